use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "classboard.sqlite3";
pub const DEFAULT_PROBLEM_COUNT: i64 = 20;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_sort ON students(sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pick_log(
            id TEXT PRIMARY KEY,
            student_name TEXT NOT NULL,
            picked_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pick_log_time ON pick_log(picked_at)",
        [],
    )?;

    // Wrong-answer tallies are keyed by the 1-based question number itself;
    // only questions with at least one recorded miss have a row.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS problems(
            question INTEGER PRIMARY KEY,
            wrong_count INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS related_problems(
            question INTEGER PRIMARY KEY,
            related TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS wrong_records(
            id TEXT PRIMARY KEY,
            student_name TEXT NOT NULL UNIQUE,
            wrong TEXT NOT NULL,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Roster names in display order.
pub fn roster_names(conn: &Connection) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM students ORDER BY sort_order")?;
    let names = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

pub fn get_problem_count(conn: &Connection) -> anyhow::Result<i64> {
    Ok(settings_get_json(conn, "board.problemCount")?
        .and_then(|v| v.as_i64())
        .unwrap_or(DEFAULT_PROBLEM_COUNT))
}

pub fn set_problem_count(conn: &Connection, count: i64) -> anyhow::Result<()> {
    settings_set_json(conn, "board.problemCount", &serde_json::json!(count))
}
