use crate::codegen;
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_optional_str, get_required_str, insert_failed, mint_failed, now_rfc3339, query_failed,
    require_db, update_failed, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn private_code_taken(conn: &Connection, code: &str) -> anyhow::Result<bool> {
    let hit: Option<i64> = conn
        .query_row("SELECT 1 FROM private_codes WHERE code = ?", [code], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(hit.is_some())
}

fn handle_generate(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let teacher_id = get_required_str(&req.params, "teacherId")?;
    let label = get_optional_str(&req.params, "label");

    let teacher_name: Option<Option<String>> = conn
        .query_row(
            "SELECT display_name FROM users WHERE id = ? AND role = 'teacher'",
            [&teacher_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    let Some(teacher_name) = teacher_name else {
        return Err(HandlerErr::new("not_found", "teacher not found"));
    };
    let teacher_name = teacher_name.unwrap_or_else(|| "Unknown".to_string());

    let code = codegen::mint_unique(|c| {
        private_code_taken(conn, &codegen::private_code_string(c))
    })
    .map_err(mint_failed)?;
    let code = codegen::private_code_string(&code);

    let code_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO private_codes(id, code, teacher_id, teacher_name, label, status, created_at)
         VALUES(?, ?, ?, ?, ?, 'active', ?)",
        (
            &code_id,
            &code,
            &teacher_id,
            &teacher_name,
            &label,
            now_rfc3339(),
        ),
    )
    .map_err(insert_failed)?;

    Ok(json!({ "codeId": code_id, "code": code }))
}

fn handle_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let teacher_id = get_required_str(&req.params, "teacherId")?;

    let mut stmt = conn
        .prepare(
            "SELECT id, code, label, status, created_at, used_by_id, used_by_name, used_at
             FROM private_codes
             WHERE teacher_id = ?
             ORDER BY created_at DESC",
        )
        .map_err(query_failed)?;
    let codes = stmt
        .query_map([&teacher_id], |r| {
            let id: String = r.get(0)?;
            let code: String = r.get(1)?;
            let label: Option<String> = r.get(2)?;
            let status: String = r.get(3)?;
            let created_at: String = r.get(4)?;
            let used_by_id: Option<String> = r.get(5)?;
            let used_by_name: Option<String> = r.get(6)?;
            let used_at: Option<String> = r.get(7)?;
            Ok(json!({
                "id": id,
                "code": code,
                "label": label,
                "status": status,
                "createdAt": created_at,
                "usedById": used_by_id,
                "usedByName": used_by_name,
                "usedAt": used_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    Ok(json!({ "codes": codes }))
}

fn handle_validate(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let code = get_required_str(&req.params, "code")?;

    // Shape check first; malformed input never reaches the store.
    if codegen::parse_private_code(code.trim()).is_none() {
        return Ok(json!({ "valid": false, "reason": "malformed" }));
    }

    let row: Option<(String, String, String, String)> = conn
        .query_row(
            "SELECT id, teacher_id, teacher_name, status FROM private_codes WHERE code = ?",
            [code.trim()],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(query_failed)?;

    Ok(match row {
        None => json!({ "valid": false, "reason": "not_found" }),
        Some((_, _, _, status)) if status != "active" => {
            json!({ "valid": false, "reason": status })
        }
        Some((code_id, teacher_id, teacher_name, _)) => json!({
            "valid": true,
            "codeId": code_id,
            "teacherId": teacher_id,
            "teacherName": teacher_name
        }),
    })
}

fn code_status(conn: &Connection, code_id: &str) -> Result<(String, String), HandlerErr> {
    conn.query_row(
        "SELECT status, teacher_id FROM private_codes WHERE id = ?",
        [code_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .optional()
    .map_err(query_failed)?
    .ok_or_else(|| HandlerErr::new("not_found", "code not found"))
}

fn handle_redeem(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let code_id = get_required_str(&req.params, "codeId")?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let student_name = get_required_str(&req.params, "studentName")?;

    let (status, teacher_id) = code_status(conn, &code_id)?;
    if status != "active" {
        return Err(HandlerErr::new(
            "invalid_state",
            format!("code is {}, not active", status),
        ));
    }

    let student_exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE id = ? AND role = 'student'",
            [&student_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    if student_exists.is_none() {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    conn.execute(
        "UPDATE private_codes
         SET status = 'used', used_by_id = ?, used_by_name = ?, used_at = ?
         WHERE id = ?",
        (&student_id, &student_name, now_rfc3339(), &code_id),
    )
    .map_err(update_failed)?;

    // Binding the student is a separate write; the original design accepts
    // the lack of a cross-document transaction here.
    conn.execute(
        "UPDATE users SET teacher_id = ?, is_private = 1, updated_at = ? WHERE id = ?",
        (&teacher_id, now_rfc3339(), &student_id),
    )
    .map_err(update_failed)?;

    Ok(json!({ "redeemed": true, "teacherId": teacher_id }))
}

fn handle_revoke(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let code_id = get_required_str(&req.params, "codeId")?;

    let (status, _) = code_status(conn, &code_id)?;
    if status != "active" {
        return Err(HandlerErr::new(
            "invalid_state",
            format!("code is {}, not active", status),
        ));
    }

    conn.execute(
        "UPDATE private_codes SET status = 'revoked' WHERE id = ?",
        [&code_id],
    )
    .map_err(update_failed)?;

    Ok(json!({ "revoked": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "codes.generate" => handle_generate(state, req),
        "codes.list" => handle_list(state, req),
        "codes.validate" => handle_validate(state, req),
        "codes.redeem" => handle_redeem(state, req),
        "codes.revoke" => handle_revoke(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
