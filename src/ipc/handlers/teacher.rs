use crate::codegen;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_optional_level, get_optional_str, get_required_str, insert_failed, mint_failed,
    now_rfc3339, query_failed, require_db, update_failed, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn class_code_taken(conn: &Connection, code: &str) -> anyhow::Result<bool> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE class_code = ?",
            [code],
            |r| r.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

fn mint_class_code(conn: &Connection) -> Result<String, HandlerErr> {
    codegen::mint_unique(|code| class_code_taken(conn, code)).map_err(mint_failed)
}

fn handle_register(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let name = get_required_str(&req.params, "name")?;
    if name.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "name must not be empty"));
    }
    let email = get_optional_str(&req.params, "email");

    let teacher_id = Uuid::new_v4().to_string();
    let class_code = mint_class_code(conn)?;
    conn.execute(
        "INSERT INTO users(id, role, display_name, email, class_code, enrolled_at)
         VALUES(?, 'teacher', ?, ?, ?, ?)",
        (&teacher_id, name.trim(), &email, &class_code, now_rfc3339()),
    )
    .map_err(insert_failed)?;

    Ok(json!({ "teacherId": teacher_id, "classCode": class_code }))
}

fn handle_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let teacher_id = get_required_str(&req.params, "teacherId")?;

    let code: Option<Option<String>> = conn
        .query_row(
            "SELECT class_code FROM users WHERE id = ? AND role = 'teacher'",
            [&teacher_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;

    match code {
        Some(c) => Ok(json!({ "classCode": c })),
        None => Err(HandlerErr::new("not_found", "teacher not found")),
    }
}

fn handle_regenerate(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let teacher_id = get_required_str(&req.params, "teacherId")?;

    let class_code = mint_class_code(conn)?;
    let updated = conn
        .execute(
            "UPDATE users SET class_code = ?, updated_at = ? WHERE id = ? AND role = 'teacher'",
            (&class_code, now_rfc3339(), &teacher_id),
        )
        .map_err(update_failed)?;
    if updated == 0 {
        return Err(HandlerErr::new("not_found", "teacher not found"));
    }

    Ok(json!({ "classCode": class_code }))
}

fn handle_join(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let code = get_required_str(&req.params, "code")?;
    let display_name = get_required_str(&req.params, "displayName")?;
    if display_name.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "displayName must not be empty"));
    }
    let email = get_optional_str(&req.params, "email");
    let level = get_optional_level(&req.params, "level")?;

    let teacher_id: Option<String> = conn
        .query_row(
            "SELECT id FROM users WHERE class_code = ? AND role = 'teacher'",
            [code.trim()],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    let Some(teacher_id) = teacher_id else {
        return Err(HandlerErr::new("invalid_code", "no class with that code"));
    };

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, role, teacher_id, display_name, email, level, enrolled_at)
         VALUES(?, 'student', ?, ?, ?, ?, ?)",
        (
            &student_id,
            &teacher_id,
            display_name.trim(),
            &email,
            level.map(|l| l.as_str()),
            now_rfc3339(),
        ),
    )
    .map_err(insert_failed)?;

    Ok(json!({ "studentId": student_id, "teacherId": teacher_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "teacher.register" => handle_register(state, req),
        "classcode.get" => handle_get(state, req),
        "classcode.regenerate" => handle_regenerate(state, req),
        "classcode.join" => handle_join(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
