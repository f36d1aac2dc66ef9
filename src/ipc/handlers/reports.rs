use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, loose_i64, required_str};
use crate::ipc::types::{AppState, Request};
use crate::scoring::{self, ExamInfo, HistoryPoint, ReportRow, StudentInfo};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;

struct ExamRecordRow {
    student: StudentInfo,
    answers_blob: String,
    vocab_score: i64,
    remarks: String,
}

struct ExamRow {
    info: ExamInfo,
    subject_info: String,
    grade_cutoffs: String,
}

fn load_exam(conn: &Connection, exam_id: &str) -> Result<Option<ExamRow>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, name, date, is_admission, subject_info, grade_cutoffs
         FROM exams WHERE id = ?",
        [exam_id],
        |r| {
            Ok(ExamRow {
                info: ExamInfo {
                    exam_id: r.get(0)?,
                    exam_name: r.get(1)?,
                    exam_date: r.get(2)?,
                    is_admission: r.get::<_, i64>(3)? != 0,
                },
                subject_info: r.get(4)?,
                grade_cutoffs: r.get(5)?,
            })
        },
    )
    .optional()
}

/// Admission exams are deliberately ungraded. For everything else an absent
/// or empty stored table falls back to the school-wide default.
fn cutoffs_for(exam: &ExamRow) -> BTreeMap<i64, i64> {
    if exam.info.is_admission {
        return BTreeMap::new();
    }
    let cutoffs = scoring::parse_cutoff_table(&exam.grade_cutoffs);
    if cutoffs.is_empty() {
        scoring::default_cutoffs()
    } else {
        cutoffs
    }
}

fn load_student(conn: &Connection, student_id: i64) -> Result<Option<StudentInfo>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, name, grade, class, school_name FROM students WHERE id = ?",
        [student_id],
        |r| {
            Ok(StudentInfo {
                id: r.get(0)?,
                name: r.get(1)?,
                grade: r.get(2)?,
                class: r.get(3)?,
                school_name: r.get(4)?,
            })
        },
    )
    .optional()
}

fn load_history(conn: &Connection, student_id: i64) -> Result<Vec<HistoryPoint>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT e.name, e.date, r.total_score
         FROM exam_records r
         JOIN exams e ON e.id = r.exam_id
         WHERE r.student_id = ?",
    )?;
    let points = stmt
        .query_map([student_id], |r| {
            Ok(HistoryPoint {
                exam_name: r.get(0)?,
                date: r.get(1)?,
                score: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(points)
}

fn load_exam_records(
    conn: &Connection,
    exam_id: &str,
) -> Result<Vec<ExamRecordRow>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, s.grade, s.class, s.school_name,
                r.student_answers, r.vocab_score, r.remarks
         FROM exam_records r
         JOIN students s ON s.id = r.student_id
         WHERE r.exam_id = ?
         ORDER BY s.name",
    )?;
    let rows = stmt
        .query_map([exam_id], |r| {
            Ok(ExamRecordRow {
                student: StudentInfo {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    grade: r.get(2)?,
                    class: r.get(3)?,
                    school_name: r.get(4)?,
                },
                answers_blob: r.get(5)?,
                vocab_score: r.get(6)?,
                remarks: r.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn handle_reports_exam(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_id = match required_str(req, "examId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exam = match load_exam(conn, &exam_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "exam not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let questions = scoring::parse_question_set(&exam.subject_info);
    let cutoffs = cutoffs_for(&exam);

    let records = match load_exam_records(conn, &exam_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        let history = match load_history(conn, record.student.id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        rows.push(ReportRow {
            answers: scoring::parse_answer_map(&record.answers_blob),
            student: record.student,
            vocab_score: record.vocab_score,
            history,
            remarks: record.remarks,
        });
    }

    let reports = scoring::compose_exam_reports(&exam.info, &questions, &cutoffs, rows);
    ok(&req.id, json!({ "reports": reports }))
}

fn handle_reports_detail(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let exam = match load_exam(conn, &exam_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "exam not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let questions = scoring::parse_question_set(&exam.subject_info);
    let cutoffs = cutoffs_for(&exam);

    // Rates must cover the whole cohort even when rendering one student.
    let records = match load_exam_records(conn, &exam_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(target_idx) = records.iter().position(|r| r.student.id == student_id) else {
        return err(&req.id, "not_found", "exam record not found", None);
    };

    let mut submissions: Vec<scoring::ScoredSubmission> = records
        .iter()
        .map(|r| {
            scoring::score_submission(
                &questions,
                &scoring::parse_answer_map(&r.answers_blob),
                Some(r.vocab_score),
            )
        })
        .collect();
    let rates = scoring::cohort_correct_rates(&questions, &submissions);

    let target = &records[target_idx];
    let scored = submissions.swap_remove(target_idx);
    let history = match load_history(conn, student_id) {
        Ok(v) => scoring::build_history(v),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let report = scoring::compose_report(
        target.student.clone(),
        exam.info,
        &questions,
        scored,
        &rates,
        history,
        &cutoffs,
        target.remarks.clone(),
    );
    ok(&req.id, json!({ "report": report }))
}

fn handle_reports_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(student_id) = req.params.get("studentId").and_then(loose_i64) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };

    let student = match load_student(conn, student_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let history = match load_history(conn, student_id) {
        Ok(v) => scoring::build_history(v),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "student": student, "history": history }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.exam" => Some(handle_reports_exam(state, req)),
        "reports.detail" => Some(handle_reports_detail(state, req)),
        "reports.student" => Some(handle_reports_student(state, req)),
        _ => None,
    }
}
