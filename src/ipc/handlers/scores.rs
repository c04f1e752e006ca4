use crate::grading::{self, RawMarks, ScoreField};
use crate::ipc::error::ok;
use crate::ipc::handlers::shared::{
    bump_revision, check_expected_revision, load_cohort, load_maxima, now_rfc3339, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn parse_value(
    raw: &serde_json::Value,
    field: ScoreField,
    max: f64,
) -> Result<Option<f64>, HandlerErr> {
    if raw.is_null() {
        // Clearing a mark: back to "never entered".
        return Ok(None);
    }
    let parsed = if let Some(n) = raw.as_f64() {
        grading::validate_score(n, field, max)
    } else if let Some(s) = raw.as_str() {
        grading::parse_score(s, field, max)
    } else {
        return Err(HandlerErr::new(
            "bad_params",
            "value must be a number, numeric string, or null",
        ));
    };
    parsed
        .map(Some)
        .map_err(|e| HandlerErr::with_details("validation_failed", e.message, json!({ "field": field.as_str() })))
}

fn update_score(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };

    let cohort_id = req
        .str_param("cohortId")
        .ok_or_else(|| HandlerErr::new("bad_params", "missing cohortId"))?
        .to_string();
    let student_id = req
        .str_param("studentId")
        .ok_or_else(|| HandlerErr::new("bad_params", "missing studentId"))?
        .to_string();
    let field = req
        .str_param("field")
        .and_then(ScoreField::parse)
        .ok_or_else(|| HandlerErr::new("bad_params", "field must be one of: test1, test2, exam"))?;

    let cohort = load_cohort(conn, &cohort_id)?;
    check_expected_revision(&req.params, cohort.revision)?;
    let maxima = load_maxima(conn, &cohort.subject_id)?;
    let max = maxima.for_field(field);

    let raw = req.params.get("value").cloned().unwrap_or(serde_json::Value::Null);
    let value = parse_value(&raw, field, max)?;

    let in_class: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE id = ? AND class_id = ?",
            (&student_id, &cohort.class_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    if in_class.is_none() {
        return Err(HandlerErr::new("not_found", "student not in cohort's class"));
    }

    let column = match field {
        ScoreField::Test1 => "test1",
        ScoreField::Test2 => "test2",
        ScoreField::Exam => "exam",
    };
    let entry_id = Uuid::new_v4().to_string();
    let sql = format!(
        "INSERT INTO score_entries(id, cohort_id, student_id, {col}, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(cohort_id, student_id) DO UPDATE SET
           {col} = excluded.{col},
           updated_at = excluded.updated_at",
        col = column
    );
    conn.execute(
        &sql,
        (&entry_id, &cohort_id, &student_id, value, now_rfc3339()),
    )
    .map_err(|e| {
        HandlerErr::with_details(
            "db_insert_failed",
            e.to_string(),
            json!({ "table": "score_entries" }),
        )
    })?;

    let revision = bump_revision(conn, &cohort_id)?;

    let marks: RawMarks = conn
        .query_row(
            "SELECT test1, test2, exam FROM score_entries WHERE cohort_id = ? AND student_id = ?",
            (&cohort_id, &student_id),
            |r| {
                Ok(RawMarks {
                    test1: r.get(0)?,
                    test2: r.get(1)?,
                    exam: r.get(2)?,
                })
            },
        )
        .map_err(HandlerErr::query)?;

    let warning = value.and_then(|v| grading::component_warning(v, field, max));
    let derived = grading::compute_derived(&marks, &maxima, cohort.grade_scheme);

    Ok(ok(
        &req.id,
        json!({
            "revision": revision,
            "warning": warning,
            "derived": derived
        }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.update" => Some(update_score(state, req).unwrap_or_else(|e| e.response(&req.id))),
        _ => None,
    }
}
