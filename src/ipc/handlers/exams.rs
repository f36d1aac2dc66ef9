use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_bool, optional_str, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::scoring::Question;
use chrono::NaiveDate;
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

struct ExamInput {
    name: String,
    grade: i64,
    class: String,
    date: String,
    subject_info: String,
    is_admission: bool,
    grade_cutoffs: String,
}

/// Authoring is the one place malformed blobs are rejected instead of
/// degraded: a question set that fails here can never reach the scorer.
fn validate_exam_input(req: &Request) -> Result<ExamInput, serde_json::Value> {
    let name = match required_str(req, "name") {
        Ok(v) if !v.trim().is_empty() => v,
        Ok(_) => return Err(err(&req.id, "bad_params", "name must not be empty", None)),
        Err(e) => return Err(e),
    };
    let grade = required_i64(req, "grade")?;
    let date = required_str(req, "date")?;
    if NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_err() {
        return Err(err(
            &req.id,
            "bad_params",
            "date must be YYYY-MM-DD",
            Some(json!({ "date": date })),
        ));
    }

    let subject_info = required_str(req, "subjectInfo")?;
    let questions: Vec<Question> = match serde_json::from_str(&subject_info) {
        Ok(v) => v,
        Err(e) => {
            return Err(err(
                &req.id,
                "bad_params",
                format!("subjectInfo is not a valid question set: {}", e),
                None,
            ))
        }
    };
    let mut seen = HashSet::new();
    for q in &questions {
        if q.score <= 0 {
            return Err(err(
                &req.id,
                "bad_params",
                "question scores must be positive",
                Some(json!({ "questionId": q.id, "score": q.score })),
            ));
        }
        if !seen.insert(q.id) {
            return Err(err(
                &req.id,
                "bad_params",
                "question ids must be unique within the exam",
                Some(json!({ "questionId": q.id })),
            ));
        }
    }

    let grade_cutoffs = optional_str(req, "gradeCutoffs").unwrap_or_else(|| "{}".to_string());
    match serde_json::from_str::<serde_json::Value>(&grade_cutoffs) {
        Ok(v) if v.is_object() => {}
        _ => {
            return Err(err(
                &req.id,
                "bad_params",
                "gradeCutoffs must be a JSON object",
                None,
            ))
        }
    }

    Ok(ExamInput {
        name,
        grade,
        class: optional_str(req, "class").unwrap_or_else(|| "전체".to_string()),
        date,
        subject_info,
        is_admission: optional_bool(req, "isAdmission").unwrap_or(false),
        grade_cutoffs,
    })
}

fn handle_exams_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT e.id, e.name, e.grade, e.class, e.date, e.is_admission,
                (SELECT COUNT(*) FROM exam_records r WHERE r.exam_id = e.id)
         FROM exams e
         ORDER BY e.date DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let exams = match stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "grade": r.get::<_, i64>(2)?,
                "class": r.get::<_, String>(3)?,
                "date": r.get::<_, String>(4)?,
                "isAdmission": r.get::<_, i64>(5)? != 0,
                "recordCount": r.get::<_, i64>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "exams": exams }))
}

fn handle_exams_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exam = match conn.query_row(
        "SELECT id, name, grade, class, date, subject_info, is_admission, grade_cutoffs
         FROM exams WHERE id = ?",
        [&exam_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "grade": r.get::<_, i64>(2)?,
                "class": r.get::<_, String>(3)?,
                "date": r.get::<_, String>(4)?,
                "subjectInfo": r.get::<_, String>(5)?,
                "isAdmission": r.get::<_, i64>(6)? != 0,
                "gradeCutoffs": r.get::<_, String>(7)?,
            }))
        },
    ) {
        Ok(v) => v,
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            return err(&req.id, "not_found", "exam not found", None)
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT r.student_id, s.name, r.total_score, r.vocab_score, r.remarks
         FROM exam_records r
         JOIN students s ON s.id = r.student_id
         WHERE r.exam_id = ?
         ORDER BY s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let records = match stmt
        .query_map([&exam_id], |r| {
            Ok(json!({
                "studentId": r.get::<_, i64>(0)?,
                "studentName": r.get::<_, String>(1)?,
                "totalScore": r.get::<_, i64>(2)?,
                "vocabScore": r.get::<_, i64>(3)?,
                "remarks": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut payload = exam;
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("records".to_string(), json!(records));
    }
    ok(&req.id, payload)
}

fn handle_exams_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let input = match validate_exam_input(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exam_id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO exams(id, name, grade, class, date, subject_info, is_admission, grade_cutoffs)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &exam_id,
            &input.name,
            input.grade,
            &input.class,
            &input.date,
            &input.subject_info,
            input.is_admission as i64,
            &input.grade_cutoffs,
        ),
    ) {
        Ok(_) => ok(&req.id, json!({ "examId": exam_id })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_exams_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let input = match validate_exam_input(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    match conn.execute(
        "UPDATE exams SET
           name = ?, grade = ?, class = ?, date = ?,
           subject_info = ?, is_admission = ?, grade_cutoffs = ?
         WHERE id = ?",
        (
            &input.name,
            input.grade,
            &input.class,
            &input.date,
            &input.subject_info,
            input.is_admission as i64,
            &input.grade_cutoffs,
            &exam_id,
        ),
    ) {
        Ok(0) => err(&req.id, "not_found", "exam not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_exams_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match conn.execute("DELETE FROM exams WHERE id = ?", [&exam_id]) {
        Ok(0) => err(&req.id, "not_found", "exam not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exams.list" => Some(handle_exams_list(state, req)),
        "exams.get" => Some(handle_exams_get(state, req)),
        "exams.create" => Some(handle_exams_create(state, req)),
        "exams.update" => Some(handle_exams_update(state, req)),
        "exams.delete" => Some(handle_exams_delete(state, req)),
        _ => None,
    }
}
