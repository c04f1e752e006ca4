use crate::grading::GradeScheme;
use crate::ipc::error::ok;
use crate::ipc::handlers::shared::{load_cohort, now_rfc3339, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn require_str(req: &Request, key: &str) -> Result<String, HandlerErr> {
    req.str_param(key)
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

fn row_exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, HandlerErr> {
    let hit: Option<i64> = conn
        .query_row(sql, [id], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::query)?;
    Ok(hit.is_some())
}

/// Get-or-create the cohort for (subject, class, term, session) and seed one
/// blank score entry per active roster member that doesn't have one yet.
fn open_cohort(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };

    let subject_id = require_str(req, "subjectId")?;
    let class_id = require_str(req, "classId")?;
    let session = require_str(req, "session")?;
    let term = req
        .params
        .get("term")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing term"))?;

    if !row_exists(conn, "SELECT 1 FROM subjects WHERE id = ?", &subject_id)? {
        return Err(HandlerErr::new("not_found", "subject not found"));
    }
    if !row_exists(conn, "SELECT 1 FROM classes WHERE id = ?", &class_id)? {
        return Err(HandlerErr::new("not_found", "class not found"));
    }

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM cohorts
             WHERE subject_id = ? AND class_id = ? AND term = ? AND session = ?",
            (&subject_id, &class_id, term, &session),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::query)?;

    let (cohort_id, created) = match existing {
        Some(id) => (id, false),
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO cohorts(id, subject_id, class_id, term, session)
                 VALUES(?, ?, ?, ?, ?)",
                (&id, &subject_id, &class_id, term, &session),
            )
            .map_err(|e| {
                HandlerErr::with_details(
                    "db_insert_failed",
                    e.to_string(),
                    json!({ "table": "cohorts" }),
                )
            })?;
            (id, true)
        }
    };

    let mut stmt = conn
        .prepare("SELECT id FROM students WHERE class_id = ? AND active = 1 ORDER BY sort_order")
        .map_err(HandlerErr::query)?;
    let student_ids: Vec<String> = stmt
        .query_map([&class_id], |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut seeded = 0usize;
    for sid in &student_ids {
        let entry_id = Uuid::new_v4().to_string();
        let n = conn
            .execute(
                "INSERT INTO score_entries(id, cohort_id, student_id, updated_at)
                 VALUES(?, ?, ?, ?)
                 ON CONFLICT(cohort_id, student_id) DO NOTHING",
                (&entry_id, &cohort_id, sid, now_rfc3339()),
            )
            .map_err(|e| {
                HandlerErr::with_details(
                    "db_insert_failed",
                    e.to_string(),
                    json!({ "table": "score_entries" }),
                )
            })?;
        seeded += n;
    }

    let cohort = load_cohort(conn, &cohort_id)?;
    Ok(ok(
        &req.id,
        json!({
            "cohortId": cohort.id,
            "created": created,
            "gradeScheme": cohort.grade_scheme.as_str(),
            "revision": cohort.revision,
            "rosterSize": student_ids.len(),
            "seededEntries": seeded
        }),
    ))
}

fn update_settings(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };

    let cohort_id = require_str(req, "cohortId")?;
    let cohort = load_cohort(conn, &cohort_id)?;

    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::new("bad_params", "missing patch object"));
    };

    let mut grade_scheme = cohort.grade_scheme;
    if let Some(v) = patch.get("gradeScheme") {
        let Some(s) = v.as_str().and_then(GradeScheme::parse) else {
            return Err(HandlerErr::new(
                "bad_params",
                "gradeScheme must be one of: five_band, six_band",
            ));
        };
        grade_scheme = s;
    }

    conn.execute(
        "UPDATE cohorts SET grade_scheme = ? WHERE id = ?",
        (grade_scheme.as_str(), &cohort_id),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    Ok(ok(
        &req.id,
        json!({
            "cohortId": cohort_id,
            "gradeScheme": grade_scheme.as_str()
        }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "cohort.open" => Some(open_cohort(state, req).unwrap_or_else(|e| e.response(&req.id))),
        "cohort.settings.update" => {
            Some(update_settings(state, req).unwrap_or_else(|e| e.response(&req.id)))
        }
        _ => None,
    }
}
