use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_optional_level, get_optional_str, get_required_str, insert_failed, now_rfc3339,
    query_failed, require_db, to_json, update_failed, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::stats::{self, Plan};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_enroll(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let teacher_id = get_required_str(&req.params, "teacherId")?;
    let display_name = get_required_str(&req.params, "displayName")?;
    if display_name.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "displayName must not be empty"));
    }
    let email = get_optional_str(&req.params, "email");
    let level = get_optional_level(&req.params, "level")?;
    let is_private = req
        .params
        .get("isPrivate")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let teacher_exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM users WHERE id = ? AND role = 'teacher'",
            [&teacher_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    if teacher_exists.is_none() {
        return Err(HandlerErr::new("not_found", "teacher not found"));
    }

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, role, teacher_id, display_name, email, level, is_private, enrolled_at)
         VALUES(?, 'student', ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &teacher_id,
            display_name.trim(),
            &email,
            level.map(|l| l.as_str()),
            is_private as i64,
            now_rfc3339(),
        ),
    )
    .map_err(insert_failed)?;

    Ok(json!({ "studentId": student_id }))
}

fn handle_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let teacher_id = get_required_str(&req.params, "teacherId")?;

    let mut stmt = conn
        .prepare(
            "SELECT id, display_name, email, level, status, is_private, plan,
                    session_count, star_count, used_seconds, enrolled_at
             FROM users
             WHERE role = 'student' AND teacher_id = ?
             ORDER BY enrolled_at DESC",
        )
        .map_err(query_failed)?;

    let students = stmt
        .query_map([&teacher_id], |r| {
            let id: String = r.get(0)?;
            let display_name: Option<String> = r.get(1)?;
            let email: Option<String> = r.get(2)?;
            let level: Option<String> = r.get(3)?;
            let status: String = r.get(4)?;
            let is_private: i64 = r.get(5)?;
            let plan: Option<String> = r.get(6)?;
            let session_count: i64 = r.get(7)?;
            let star_count: i64 = r.get(8)?;
            let used_seconds: i64 = r.get(9)?;
            let enrolled_at: String = r.get(10)?;
            Ok(json!({
                "id": id,
                "displayName": display_name,
                "email": email,
                "level": level,
                "status": status,
                "isPrivateStudent": is_private != 0,
                "plan": plan,
                "sessionCount": session_count,
                "starCount": star_count,
                "usedSeconds": used_seconds,
                "enrolledAt": enrolled_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    Ok(json!({ "students": students }))
}

fn set_status(
    state: &mut AppState,
    req: &Request,
    status: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;

    // Re-applying the current status is a harmless no-op.
    let updated = conn
        .execute(
            "UPDATE users SET status = ?, updated_at = ? WHERE id = ? AND role = 'student'",
            (status, now_rfc3339(), &student_id),
        )
        .map_err(update_failed)?;
    if updated == 0 {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    Ok(json!({ "studentId": student_id, "status": status }))
}

fn handle_remove(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let teacher_id = get_required_str(&req.params, "teacherId")?;
    let student_id = get_required_str(&req.params, "studentId")?;

    // Detach only; the profile and its history stay.
    let updated = conn
        .execute(
            "UPDATE users SET teacher_id = NULL, is_private = 0, updated_at = ?
             WHERE id = ? AND teacher_id = ? AND role = 'student'",
            (now_rfc3339(), &student_id, &teacher_id),
        )
        .map_err(update_failed)?;
    if updated == 0 {
        return Err(HandlerErr::new("not_found", "student not in this class"));
    }
    Ok(json!({ "removed": true }))
}

fn handle_set_plan(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let raw = get_required_str(&req.params, "plan")?;
    let plan = Plan::parse(&raw)
        .ok_or_else(|| HandlerErr::new("bad_params", format!("unknown plan: {}", raw)))?;

    let updated = conn
        .execute(
            "UPDATE users SET plan = ?, updated_at = ? WHERE id = ? AND role = 'student'",
            (plan.as_str(), now_rfc3339(), &student_id),
        )
        .map_err(update_failed)?;
    if updated == 0 {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    Ok(json!({ "studentId": student_id, "plan": plan.as_str() }))
}

fn handle_usage(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;

    let row: Option<(i64, Option<String>)> = conn
        .query_row(
            "SELECT used_seconds, plan FROM users WHERE id = ? AND role = 'student'",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(query_failed)?;
    let Some((used_seconds, plan_name)) = row else {
        return Err(HandlerErr::new("not_found", "student not found"));
    };

    let plan = plan_name.as_deref().and_then(Plan::parse);
    to_json(stats::usage_stats(used_seconds, plan))
}

fn handle_record_session(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let seconds = req
        .params
        .get("seconds")
        .and_then(|v| v.as_i64())
        .filter(|s| *s >= 0)
        .ok_or_else(|| HandlerErr::new("bad_params", "seconds must be a non-negative integer"))?;
    let stars = req.params.get("stars").and_then(|v| v.as_i64()).unwrap_or(0);
    if stars < 0 {
        return Err(HandlerErr::new("bad_params", "stars must not be negative"));
    }

    let updated = conn
        .execute(
            "UPDATE users
             SET session_count = session_count + 1,
                 star_count = star_count + ?,
                 used_seconds = used_seconds + ?,
                 updated_at = ?
             WHERE id = ? AND role = 'student'",
            (stars, seconds, now_rfc3339(), &student_id),
        )
        .map_err(update_failed)?;
    if updated == 0 {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    Ok(json!({ "recorded": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "roster.enroll" => handle_enroll(state, req),
        "roster.list" => handle_list(state, req),
        "roster.suspend" => set_status(state, req, "suspended"),
        "roster.reactivate" => set_status(state, req, "active"),
        "roster.remove" => handle_remove(state, req),
        "roster.setPlan" => handle_set_plan(state, req),
        "roster.usage" => handle_usage(state, req),
        "roster.recordSession" => handle_record_session(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
