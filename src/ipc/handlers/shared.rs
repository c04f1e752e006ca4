use crate::grading::{ComponentMaxima, GradeScheme, RawMarks};
use crate::ipc::error::err;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        code: &'static str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn query(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Debug, Clone)]
pub struct CohortRow {
    pub id: String,
    pub subject_id: String,
    pub class_id: String,
    pub term: i64,
    pub session: String,
    pub grade_scheme: GradeScheme,
    pub revision: i64,
}

pub fn load_cohort(conn: &Connection, cohort_id: &str) -> Result<CohortRow, HandlerErr> {
    let row: Option<(String, String, i64, String, String, i64)> = conn
        .query_row(
            "SELECT subject_id, class_id, term, session, grade_scheme, revision
             FROM cohorts
             WHERE id = ?",
            [cohort_id],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((subject_id, class_id, term, session, scheme, revision)) = row else {
        return Err(HandlerErr::new("not_found", "cohort not found"));
    };
    let grade_scheme = GradeScheme::parse(&scheme).unwrap_or_default();
    Ok(CohortRow {
        id: cohort_id.to_string(),
        subject_id,
        class_id,
        term,
        session,
        grade_scheme,
        revision,
    })
}

pub fn load_maxima(conn: &Connection, subject_id: &str) -> Result<ComponentMaxima, HandlerErr> {
    let row: Option<(f64, f64, f64)> = conn
        .query_row(
            "SELECT max_test1, max_test2, max_exam FROM subjects WHERE id = ?",
            [subject_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?;
    let Some((test1, test2, exam)) = row else {
        return Err(HandlerErr::new("not_found", "subject not found"));
    };
    Ok(ComponentMaxima { test1, test2, exam })
}

#[derive(Debug, Clone)]
pub struct EntryRow {
    pub student_id: String,
    pub student_no: Option<String>,
    pub name: String,
    pub sort_order: i64,
    pub marks: RawMarks,
}

/// Active roster members in roster order, with whatever raw marks exist for
/// the cohort. Students added after `cohort.open` still appear (left join),
/// just with blank marks.
pub fn load_cohort_entries(
    conn: &Connection,
    cohort: &CohortRow,
) -> Result<Vec<EntryRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.student_no, s.name, s.sort_order, e.test1, e.test2, e.exam
             FROM students s
             LEFT JOIN score_entries e ON e.student_id = s.id AND e.cohort_id = ?
             WHERE s.class_id = ? AND s.active = 1
             ORDER BY s.sort_order",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map((&cohort.id, &cohort.class_id), |r| {
        Ok(EntryRow {
            student_id: r.get(0)?,
            student_no: r.get(1)?,
            name: r.get(2)?,
            sort_order: r.get(3)?,
            marks: RawMarks {
                test1: r.get(4)?,
                test2: r.get(5)?,
                exam: r.get(6)?,
            },
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

/// Optional optimistic-concurrency check: callers that send
/// `expectedRevision` are refused when someone else wrote in between.
pub fn check_expected_revision(
    params: &serde_json::Value,
    current: i64,
) -> Result<(), HandlerErr> {
    let Some(v) = params.get("expectedRevision") else {
        return Ok(());
    };
    if v.is_null() {
        return Ok(());
    }
    let Some(expected) = v.as_i64() else {
        return Err(HandlerErr::new(
            "bad_params",
            "expectedRevision must be an integer",
        ));
    };
    if expected != current {
        return Err(HandlerErr::with_details(
            "revision_conflict",
            "cohort was modified by another writer",
            json!({ "expectedRevision": expected, "currentRevision": current }),
        ));
    }
    Ok(())
}

pub fn bump_revision(conn: &Connection, cohort_id: &str) -> Result<i64, HandlerErr> {
    conn.execute(
        "UPDATE cohorts SET revision = revision + 1 WHERE id = ?",
        [cohort_id],
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    conn.query_row(
        "SELECT revision FROM cohorts WHERE id = ?",
        [cohort_id],
        |r| r.get(0),
    )
    .map_err(HandlerErr::query)
}
