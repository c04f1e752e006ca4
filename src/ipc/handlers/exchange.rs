use crate::csv::{self, ExportRow, HeaderVariant, RosterEntry};
use crate::ipc::error::ok;
use crate::ipc::handlers::shared::{
    check_expected_revision, load_cohort, load_cohort_entries, load_maxima, now_rfc3339,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_import_csv(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };

    let cohort_id = req
        .str_param("cohortId")
        .ok_or_else(|| HandlerErr::new("bad_params", "missing cohortId"))?
        .to_string();
    let csv_text = req
        .str_param("csvText")
        .ok_or_else(|| HandlerErr::new("bad_params", "missing csvText"))?
        .to_string();

    let cohort = load_cohort(conn, &cohort_id)?;
    check_expected_revision(&req.params, cohort.revision)?;
    let maxima = load_maxima(conn, &cohort.subject_id)?;
    let entries = load_cohort_entries(conn, &cohort)?;

    let roster: Vec<RosterEntry> = entries
        .iter()
        .map(|e| RosterEntry {
            student_id: e.student_id.clone(),
            student_no: e.student_no.clone(),
            name: e.name.clone(),
        })
        .collect();

    let outcome = csv::reconcile_import(&csv_text, &roster, &maxima)
        .map_err(|e| HandlerErr::new("bad_header", e.message))?;

    let mut revision = cohort.revision;
    if !outcome.updates.is_empty() {
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
        for u in &outcome.updates {
            let entry_id = Uuid::new_v4().to_string();
            // Matched rows overwrite all three components; a blank cell in
            // the sheet clears the mark back to "never entered".
            if let Err(e) = tx.execute(
                "INSERT INTO score_entries(id, cohort_id, student_id, test1, test2, exam, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(cohort_id, student_id) DO UPDATE SET
                   test1 = excluded.test1,
                   test2 = excluded.test2,
                   exam = excluded.exam,
                   updated_at = excluded.updated_at",
                (
                    &entry_id,
                    &cohort_id,
                    &u.student_id,
                    u.marks.test1,
                    u.marks.test2,
                    u.marks.exam,
                    now_rfc3339(),
                ),
            ) {
                let _ = tx.rollback();
                return Err(HandlerErr::with_details(
                    "db_insert_failed",
                    e.to_string(),
                    json!({ "table": "score_entries" }),
                ));
            }
        }
        if let Err(e) = tx.execute(
            "UPDATE cohorts SET revision = revision + 1 WHERE id = ?",
            [&cohort_id],
        ) {
            let _ = tx.rollback();
            return Err(HandlerErr::new("db_update_failed", e.to_string()));
        }
        tx.commit()
            .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
        revision += 1;
    }

    let updated_ids: Vec<&str> = outcome
        .updates
        .iter()
        .map(|u| u.student_id.as_str())
        .collect();
    Ok(ok(
        &req.id,
        json!({
            "rowsRead": outcome.rows_read,
            "matchedCount": outcome.matched_count,
            "updatedStudentIds": updated_ids,
            "errors": outcome.errors,
            "warnings": outcome.warnings,
            "revision": revision
        }),
    ))
}

fn handle_export_csv(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };

    let cohort_id = req
        .str_param("cohortId")
        .ok_or_else(|| HandlerErr::new("bad_params", "missing cohortId"))?;
    let variant = match req.params.get("variant") {
        None => HeaderVariant::NameKeyed,
        Some(v) if v.is_null() => HeaderVariant::NameKeyed,
        Some(v) => v
            .as_str()
            .and_then(HeaderVariant::parse)
            .ok_or_else(|| {
                HandlerErr::new(
                    "bad_params",
                    "variant must be one of: name_keyed, id_keyed",
                )
            })?,
    };

    let cohort = load_cohort(conn, cohort_id)?;
    let entries = load_cohort_entries(conn, &cohort)?;

    let rows: Vec<ExportRow> = entries
        .iter()
        .map(|e| ExportRow {
            student_no: e.student_no.clone(),
            name: e.name.clone(),
            marks: e.marks,
        })
        .collect();
    let csv_text = csv::export_csv(&rows, variant);

    Ok(ok(
        &req.id,
        json!({
            "cohortId": cohort.id,
            "variant": variant.as_str(),
            "csvText": csv_text,
            "rowCount": rows.len()
        }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "cohort.importCsv" => {
            Some(handle_import_csv(state, req).unwrap_or_else(|e| e.response(&req.id)))
        }
        "cohort.exportCsv" => {
            Some(handle_export_csv(state, req).unwrap_or_else(|e| e.response(&req.id)))
        }
        _ => None,
    }
}
