use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, is_constraint_violation, optional_i64, optional_str, required_i64, required_str,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const STUDENT_ID_MIN: i64 = 10_000;
const STUDENT_ID_MAX: i64 = 99_999;

/// Students are attached to the teacher responsible for their grade/class,
/// resolved through teacher_assignments. No assignment means no teacher.
fn assigned_teacher_id(
    conn: &Connection,
    grade: i64,
    class: &str,
) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT teacher_id FROM teacher_assignments WHERE grade = ? AND class = ?",
        (grade, class),
        |r| r.get(0),
    )
    .optional()
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade_filter = optional_i64(req, "grade");

    let sql = "SELECT s.id, s.name, s.grade, s.class, s.phone_number, s.school_name,
                      s.teacher_id, t.name
               FROM students s
               LEFT JOIN teachers t ON t.id = s.teacher_id
               WHERE (?1 IS NULL OR s.grade = ?1)
               ORDER BY s.grade, s.name";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students = match stmt
        .query_map([grade_filter], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "name": r.get::<_, String>(1)?,
                "grade": r.get::<_, i64>(2)?,
                "class": r.get::<_, String>(3)?,
                "phoneNumber": r.get::<_, String>(4)?,
                "schoolName": r.get::<_, String>(5)?,
                "teacherId": r.get::<_, Option<String>>(6)?,
                "teacherName": r.get::<_, Option<String>>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "students": students }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_i64(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !(STUDENT_ID_MIN..=STUDENT_ID_MAX).contains(&student_id) {
        return err(
            &req.id,
            "bad_params",
            "student id must be a 5-digit number",
            Some(json!({ "id": student_id })),
        );
    }
    let name = match required_str(req, "name") {
        Ok(v) if !v.trim().is_empty() => v,
        Ok(_) => return err(&req.id, "bad_params", "name must not be empty", None),
        Err(e) => return e,
    };
    let grade = match required_i64(req, "grade") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class = optional_str(req, "class").unwrap_or_else(|| "전체".to_string());
    let phone_number = optional_str(req, "phoneNumber").unwrap_or_default();
    let school_name = optional_str(req, "schoolName").unwrap_or_default();

    let teacher_id = match assigned_teacher_id(conn, grade, &class) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match conn.execute(
        "INSERT INTO students(id, name, grade, class, phone_number, school_name, teacher_id)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            student_id,
            &name,
            grade,
            &class,
            &phone_number,
            &school_name,
            &teacher_id,
        ),
    ) {
        Ok(_) => ok(&req.id, json!({ "studentId": student_id })),
        Err(e) if is_constraint_violation(&e) => err(
            &req.id,
            "conflict",
            "student id already exists",
            Some(json!({ "id": student_id })),
        ),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) if !v.trim().is_empty() => v,
        Ok(_) => return err(&req.id, "bad_params", "name must not be empty", None),
        Err(e) => return e,
    };
    let grade = match required_i64(req, "grade") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class = optional_str(req, "class").unwrap_or_else(|| "전체".to_string());
    let phone_number = optional_str(req, "phoneNumber");
    let school_name = optional_str(req, "schoolName");

    // Grade or class moves re-resolve the responsible teacher.
    let teacher_id = match assigned_teacher_id(conn, grade, &class) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match conn.execute(
        "UPDATE students SET
           name = ?,
           grade = ?,
           class = ?,
           phone_number = COALESCE(?, phone_number),
           school_name = COALESCE(?, school_name),
           teacher_id = ?
         WHERE id = ?",
        (
            &name,
            grade,
            &class,
            &phone_number,
            &school_name,
            &teacher_id,
            student_id,
        ),
    ) {
        Ok(0) => err(&req.id, "not_found", "student not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match conn.execute("DELETE FROM students WHERE id = ?", [student_id]) {
        Ok(0) => err(&req.id, "not_found", "student not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
