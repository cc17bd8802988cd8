use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("tutordesk.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    // Teacher and student profiles share one table, split by role.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            role TEXT NOT NULL,
            teacher_id TEXT,
            display_name TEXT,
            email TEXT,
            level TEXT,
            class_code TEXT,
            enrolled_at TEXT NOT NULL,
            session_count INTEGER NOT NULL DEFAULT 0,
            star_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active',
            is_private INTEGER NOT NULL DEFAULT 0,
            plan TEXT,
            used_seconds INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_teacher ON users(teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_role_teacher ON users(role, teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_class_code ON users(class_code)",
        [],
    )?;

    // Early workspaces predate subscription plans and usage counters.
    ensure_users_plan_columns(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS missions(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            title TEXT NOT NULL,
            target_level TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_missions_teacher ON missions(teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_missions_teacher_active ON missions(teacher_id, is_active)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS mission_completions(
            mission_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            PRIMARY KEY(mission_id, student_id),
            FOREIGN KEY(mission_id) REFERENCES missions(id),
            FOREIGN KEY(student_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mission_completions_student ON mission_completions(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS private_codes(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            teacher_id TEXT NOT NULL,
            teacher_name TEXT NOT NULL,
            label TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            used_by_id TEXT,
            used_by_name TEXT,
            used_at TEXT,
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        )",
        [],
    )?;
    ensure_private_codes_label(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_private_codes_teacher ON private_codes(teacher_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_users_plan_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "users", "plan")? {
        conn.execute("ALTER TABLE users ADD COLUMN plan TEXT", [])?;
    }
    if !table_has_column(conn, "users", "used_seconds")? {
        conn.execute(
            "ALTER TABLE users ADD COLUMN used_seconds INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    Ok(())
}

fn ensure_private_codes_label(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "private_codes", "label")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE private_codes ADD COLUMN label TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
