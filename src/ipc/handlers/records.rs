use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, loose_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::scoring;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn answers_from_value(value: Option<&serde_json::Value>) -> HashMap<String, String> {
    let Some(obj) = value.and_then(|v| v.as_object()) else {
        return HashMap::new();
    };
    obj.iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect()
}

/// Atomic per-record upsert keyed on (exam, student). A re-save overwrites
/// the stored answers and derived fields in place; the row id is preserved.
fn upsert_record(
    conn: &Connection,
    exam_id: &str,
    student_id: i64,
    answers: &HashMap<String, String>,
    scored: &scoring::ScoredSubmission,
    remarks: &str,
) -> Result<(), rusqlite::Error> {
    let record_id = Uuid::new_v4().to_string();
    let student_answers = serde_json::to_string(answers).unwrap_or_else(|_| "{}".to_string());
    let category_scores =
        serde_json::to_string(&scored.category_scores).unwrap_or_else(|_| "{}".to_string());
    let updated_at = chrono::Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO exam_records(
            id, exam_id, student_id, student_answers,
            total_score, vocab_score, category_scores, remarks, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(exam_id, student_id) DO UPDATE SET
           student_answers = excluded.student_answers,
           total_score = excluded.total_score,
           vocab_score = excluded.vocab_score,
           category_scores = excluded.category_scores,
           remarks = excluded.remarks,
           updated_at = excluded.updated_at",
        (
            &record_id,
            exam_id,
            student_id,
            &student_answers,
            scored.total_score,
            scored.vocab_score,
            &category_scores,
            remarks,
            &updated_at,
        ),
    )?;
    Ok(())
}

fn handle_records_save_batch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(submissions) = req.params.get("submissions").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing submissions[]", None);
    };

    let subject_info: Option<String> = match conn
        .query_row("SELECT subject_info FROM exams WHERE id = ?", [&exam_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(subject_info) = subject_info else {
        return err(&req.id, "not_found", "exam not found", None);
    };
    let questions = scoring::parse_question_set(&subject_info);

    let mut saved = 0_usize;
    let mut errors: Vec<serde_json::Value> = Vec::new();

    for (i, sub) in submissions.iter().enumerate() {
        let Some(student_id) = sub.get("studentId").and_then(loose_i64) else {
            errors.push(json!({
                "studentId": serde_json::Value::Null,
                "code": "bad_params",
                "message": format!("submission at index {} missing/invalid studentId", i),
            }));
            continue;
        };

        let answers = answers_from_value(sub.get("answers"));
        // The score-entry UI says vocabScore; older import tooling says
        // bonusScore. Same field.
        let vocab_score = sub
            .get("vocabScore")
            .or_else(|| sub.get("bonusScore"))
            .and_then(loose_i64);
        let remarks = sub
            .get("remarks")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let scored = scoring::score_submission(&questions, &answers, vocab_score);

        // One failing record is reported and skipped; the batch continues.
        match upsert_record(conn, &exam_id, student_id, &answers, &scored, remarks) {
            Ok(()) => saved += 1,
            Err(e) => {
                tracing::warn!(
                    exam_id = %exam_id,
                    student_id,
                    error = %e,
                    "failed to save exam record"
                );
                errors.push(json!({
                    "studentId": student_id,
                    "code": "db_insert_failed",
                    "message": e.to_string(),
                }));
            }
        }
    }

    let mut result = json!({ "ok": true, "saved": saved });
    if !errors.is_empty() {
        if let Some(obj) = result.as_object_mut() {
            obj.insert("errors".into(), json!(errors));
        }
    }
    ok(&req.id, result)
}

fn handle_records_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(student_id) = req.params.get("studentId").and_then(loose_i64) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };

    match conn.execute(
        "DELETE FROM exam_records WHERE exam_id = ? AND student_id = ?",
        (&exam_id, student_id),
    ) {
        Ok(0) => err(&req.id, "not_found", "exam record not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_records_delete_many(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(ids) = req.params.get("studentIds").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing studentIds[]", None);
    };

    let mut deleted = 0_usize;
    for value in ids {
        let Some(student_id) = loose_i64(value) else {
            continue;
        };
        match conn.execute(
            "DELETE FROM exam_records WHERE exam_id = ? AND student_id = ?",
            (&exam_id, student_id),
        ) {
            Ok(n) => deleted += n,
            Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
        }
    }

    ok(&req.id, json!({ "deleted": deleted }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "records.saveBatch" => Some(handle_records_save_batch(state, req)),
        "records.delete" => Some(handle_records_delete(state, req)),
        "records.deleteMany" => Some(handle_records_delete_many(state, req)),
        _ => None,
    }
}
