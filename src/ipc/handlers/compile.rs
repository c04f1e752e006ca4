use crate::grading::{self, DerivedMarks};
use crate::ipc::error::ok;
use crate::ipc::handlers::shared::{
    load_cohort, load_cohort_entries, load_maxima, CohortRow, EntryRow, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

struct CompiledCohort {
    cohort: CohortRow,
    rows: Vec<(EntryRow, Option<DerivedMarks>, Option<u32>)>,
    statistics: grading::ClassStatistics,
    histogram: Vec<grading::GradeBandCount>,
}

fn compile_cohort(conn: &Connection, cohort_id: &str) -> Result<CompiledCohort, HandlerErr> {
    let cohort = load_cohort(conn, cohort_id)?;
    let maxima = load_maxima(conn, &cohort.subject_id)?;
    let entries = load_cohort_entries(conn, &cohort)?;

    let deriveds: Vec<Option<DerivedMarks>> = entries
        .iter()
        .map(|e| grading::compute_derived(&e.marks, &maxima, cohort.grade_scheme))
        .collect();
    let ranks = grading::compute_ranks(
        &deriveds
            .iter()
            .map(|d| d.map(|m| m.total))
            .collect::<Vec<_>>(),
    );
    let statistics = grading::compute_statistics(&deriveds);
    let histogram = grading::grade_histogram(&deriveds, cohort.grade_scheme);

    let mut rows: Vec<(EntryRow, Option<DerivedMarks>, Option<u32>)> = entries
        .into_iter()
        .zip(deriveds)
        .zip(ranks)
        .map(|((e, d), r)| (e, d, r))
        .collect();
    // Ranked students first, in rank order; never-scored after, in roster order.
    rows.sort_by_key(|(e, _, r)| match r {
        Some(rank) => (0i64, *rank as i64),
        None => (1i64, e.sort_order),
    });

    Ok(CompiledCohort {
        cohort,
        rows,
        statistics,
        histogram,
    })
}

fn compiled_response(id: &str, compiled: &CompiledCohort) -> serde_json::Value {
    let per_student: Vec<serde_json::Value> = compiled
        .rows
        .iter()
        .map(|(e, d, r)| {
            json!({
                "studentId": e.student_id,
                "studentNo": e.student_no,
                "name": e.name,
                "test1": e.marks.test1,
                "test2": e.marks.test2,
                "exam": e.marks.exam,
                "total": d.map(|m| m.total),
                "average": d.map(|m| m.average),
                "grade": d.map(|m| m.grade),
                "rank": r
            })
        })
        .collect();

    ok(
        id,
        json!({
            "cohort": {
                "id": compiled.cohort.id,
                "subjectId": compiled.cohort.subject_id,
                "classId": compiled.cohort.class_id,
                "term": compiled.cohort.term,
                "session": compiled.cohort.session,
                "gradeScheme": compiled.cohort.grade_scheme.as_str(),
                "revision": compiled.cohort.revision
            },
            "perStudent": per_student,
            "statistics": compiled.statistics,
            "gradeHistogram": compiled.histogram
        }),
    )
}

/// Fire-and-forget compilation event for external listeners (notification
/// dispatch lives outside this process). Failure is never surfaced.
fn emit_compiled_event(compiled: &CompiledCohort) {
    let scored = compiled.rows.iter().filter(|(_, d, _)| d.is_some()).count();
    eprintln!(
        "{}",
        json!({
            "event": "result.compiled",
            "cohortId": compiled.cohort.id,
            "revision": compiled.cohort.revision,
            "scoredStudents": scored
        })
    );
}

fn handle_compile(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let cohort_id = req
        .str_param("cohortId")
        .ok_or_else(|| HandlerErr::new("bad_params", "missing cohortId"))?;

    let compiled = compile_cohort(conn, cohort_id)?;
    emit_compiled_event(&compiled);
    Ok(compiled_response(&req.id, &compiled))
}

fn handle_statistics(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let cohort_id = req
        .str_param("cohortId")
        .ok_or_else(|| HandlerErr::new("bad_params", "missing cohortId"))?;

    let compiled = compile_cohort(conn, cohort_id)?;
    Ok(ok(
        &req.id,
        json!({
            "cohortId": compiled.cohort.id,
            "statistics": compiled.statistics,
            "gradeHistogram": compiled.histogram
        }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "cohort.compile" => Some(handle_compile(state, req).unwrap_or_else(|e| e.response(&req.id))),
        "cohort.statistics" => {
            Some(handle_statistics(state, req).unwrap_or_else(|e| e.response(&req.id)))
        }
        _ => None,
    }
}
