use crate::ipc::error::ok;
use crate::ipc::helpers::{
    get_optional_level, get_required_str, insert_failed, now_rfc3339, query_failed, require_db,
    to_json, update_failed, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::stats::{self, Level, MissionDef, RosterEntry};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// The teacher's roster shaped for the aggregation engine, completed-mission
/// sets included. One query for the students, one for their completions.
fn load_roster(conn: &Connection, teacher_id: &str) -> Result<Vec<RosterEntry>, HandlerErr> {
    let mut completions: HashMap<String, HashSet<String>> = HashMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT mc.student_id, mc.mission_id
             FROM mission_completions mc
             JOIN users u ON u.id = mc.student_id
             WHERE u.teacher_id = ?",
        )
        .map_err(query_failed)?;
    let pairs = stmt
        .query_map([teacher_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    for (student_id, mission_id) in pairs {
        completions.entry(student_id).or_default().insert(mission_id);
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, display_name, email, level
             FROM users
             WHERE role = 'student' AND teacher_id = ?
             ORDER BY enrolled_at DESC",
        )
        .map_err(query_failed)?;
    let roster = stmt
        .query_map([teacher_id], |r| {
            let id: String = r.get(0)?;
            let display_name: Option<String> = r.get(1)?;
            let email: Option<String> = r.get(2)?;
            let level: Option<String> = r.get(3)?;
            Ok((id, display_name, email, level))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?
        .into_iter()
        .map(|(id, display_name, email, level)| {
            let completed = completions.remove(&id).unwrap_or_default();
            RosterEntry {
                id,
                display_name,
                email,
                level: level.as_deref().and_then(Level::parse),
                completed,
            }
        })
        .collect();

    Ok(roster)
}

fn handle_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let teacher_id = get_required_str(&req.params, "teacherId")?;
    let title = get_required_str(&req.params, "title")?;
    if title.trim().is_empty() {
        return Err(HandlerErr::new("bad_params", "title must not be empty"));
    }
    let target_level = get_optional_level(&req.params, "targetLevel")?;

    let mission_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO missions(id, teacher_id, title, target_level, is_active, created_at)
         VALUES(?, ?, ?, ?, 1, ?)",
        (
            &mission_id,
            &teacher_id,
            title.trim(),
            target_level.map(|l| l.as_str()),
            now_rfc3339(),
        ),
    )
    .map_err(insert_failed)?;

    Ok(json!({ "missionId": mission_id }))
}

fn handle_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let teacher_id = get_required_str(&req.params, "teacherId")?;

    let mut stmt = conn
        .prepare(
            "SELECT id, title, target_level, created_at
             FROM missions
             WHERE teacher_id = ? AND is_active = 1
             ORDER BY created_at DESC",
        )
        .map_err(query_failed)?;
    let missions = stmt
        .query_map([&teacher_id], |r| {
            let id: String = r.get(0)?;
            let title: String = r.get(1)?;
            let target_level: Option<String> = r.get(2)?;
            let created_at: String = r.get(3)?;
            Ok(json!({
                "id": id,
                "title": title,
                "targetLevel": target_level,
                "createdAt": created_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;

    Ok(json!({ "missions": missions }))
}

fn handle_deactivate(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let mission_id = get_required_str(&req.params, "missionId")?;

    let updated = conn
        .execute(
            "UPDATE missions SET is_active = 0 WHERE id = ?",
            [&mission_id],
        )
        .map_err(update_failed)?;
    if updated == 0 {
        return Err(HandlerErr::new("not_found", "mission not found"));
    }
    Ok(json!({ "missionId": mission_id, "isActive": false }))
}

fn handle_complete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let mission_id = get_required_str(&req.params, "missionId")?;
    let student_id = get_required_str(&req.params, "studentId")?;

    let mission_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM missions WHERE id = ?", [&mission_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(query_failed)?;
    if mission_exists.is_none() {
        return Err(HandlerErr::new("not_found", "mission not found"));
    }

    // Set semantics: completing twice leaves one row.
    conn.execute(
        "INSERT OR IGNORE INTO mission_completions(mission_id, student_id, completed_at)
         VALUES(?, ?, ?)",
        (&mission_id, &student_id, now_rfc3339()),
    )
    .map_err(insert_failed)?;

    Ok(json!({ "completed": true }))
}

fn handle_stats(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let teacher_id = get_required_str(&req.params, "teacherId")?;
    let mission_id = get_required_str(&req.params, "missionId")?;

    let target: Option<Option<String>> = conn
        .query_row(
            "SELECT target_level FROM missions WHERE id = ? AND teacher_id = ?",
            (&mission_id, &teacher_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    let Some(target_level) = target else {
        return Err(HandlerErr::new("not_found", "mission not found"));
    };

    let roster = load_roster(conn, &teacher_id)?;
    to_json(stats::mission_stats(
        &mission_id,
        target_level.as_deref().and_then(Level::parse),
        &roster,
    ))
}

fn handle_stats_all(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let teacher_id = get_required_str(&req.params, "teacherId")?;

    // Both reads must succeed before any aggregation happens.
    let mut stmt = conn
        .prepare(
            "SELECT id, target_level FROM missions
             WHERE teacher_id = ? AND is_active = 1
             ORDER BY created_at DESC",
        )
        .map_err(query_failed)?;
    let missions: Vec<MissionDef> = stmt
        .query_map([&teacher_id], |r| {
            let id: String = r.get(0)?;
            let target_level: Option<String> = r.get(1)?;
            Ok((id, target_level))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?
        .into_iter()
        .map(|(id, target_level)| MissionDef {
            id,
            target_level: target_level.as_deref().and_then(Level::parse),
        })
        .collect();
    let roster = load_roster(conn, &teacher_id)?;

    let all = stats::all_mission_stats(&missions, &roster);
    Ok(json!({ "stats": to_json(all)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "missions.create" => handle_create(state, req),
        "missions.list" => handle_list(state, req),
        "missions.deactivate" => handle_deactivate(state, req),
        "missions.complete" => handle_complete(state, req),
        "missions.stats" => handle_stats(state, req),
        "missions.statsAll" => handle_stats_all(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
