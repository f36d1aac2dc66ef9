use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, is_constraint_violation, required_i64, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut teacher_stmt = match conn.prepare("SELECT id, name FROM teachers ORDER BY name") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let teachers = match teacher_stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut assign_stmt = match conn.prepare(
        "SELECT id, grade, class FROM teacher_assignments
         WHERE teacher_id = ? ORDER BY grade",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut rows = Vec::with_capacity(teachers.len());
    for (teacher_id, name) in teachers {
        let assignments = match assign_stmt
            .query_map([&teacher_id], |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "grade": r.get::<_, i64>(1)?,
                    "class": r.get::<_, String>(2)?,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        rows.push(json!({
            "id": teacher_id,
            "name": name,
            "assignments": assignments,
        }));
    }

    ok(&req.id, json!({ "teachers": rows }))
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
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
    let class = match required_str(req, "class") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_insert_failed", e.to_string(), None),
    };

    let teacher_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO teachers(id, name) VALUES(?, ?)",
        (&teacher_id, &name),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    let assignment_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO teacher_assignments(id, teacher_id, grade, class) VALUES(?, ?, ?, ?)",
        (&assignment_id, &teacher_id, grade, &class),
    ) {
        if is_constraint_violation(&e) {
            return err(
                &req.id,
                "conflict",
                "grade/class is already assigned to another teacher",
                Some(json!({ "grade": grade, "class": class })),
            );
        }
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "teacherId": teacher_id }))
}

fn handle_teachers_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) if !v.trim().is_empty() => v,
        Ok(_) => return err(&req.id, "bad_params", "name must not be empty", None),
        Err(e) => return e,
    };

    match conn.execute(
        "UPDATE teachers SET name = ? WHERE id = ?",
        (&name, &teacher_id),
    ) {
        Ok(0) => err(&req.id, "not_found", "teacher not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_teachers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match conn.execute("DELETE FROM teachers WHERE id = ?", [&teacher_id]) {
        Ok(0) => err(&req.id, "not_found", "teacher not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_assignment_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade = match required_i64(req, "grade") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class = match required_str(req, "class") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let assignment_id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO teacher_assignments(id, teacher_id, grade, class) VALUES(?, ?, ?, ?)",
        (&assignment_id, &teacher_id, grade, &class),
    ) {
        Ok(_) => ok(&req.id, json!({ "assignmentId": assignment_id })),
        Err(e) if is_constraint_violation(&e) => err(
            &req.id,
            "conflict",
            "assignment already exists for this grade/class",
            Some(json!({ "grade": grade, "class": class })),
        ),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_assignment_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match conn.execute(
        "DELETE FROM teacher_assignments WHERE id = ?",
        [&assignment_id],
    ) {
        Ok(0) => err(&req.id, "not_found", "assignment not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.update" => Some(handle_teachers_update(state, req)),
        "teachers.delete" => Some(handle_teachers_delete(state, req)),
        "teachers.assignment.add" => Some(handle_assignment_add(state, req)),
        "teachers.assignment.remove" => Some(handle_assignment_remove(state, req)),
        _ => None,
    }
}
