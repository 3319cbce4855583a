use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "marksentry.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rosters(
            id TEXT PRIMARY KEY,
            school TEXT NOT NULL,
            class_level TEXT NOT NULL,
            cycle TEXT NOT NULL,
            scheme_id TEXT NOT NULL,
            updated_at TEXT,
            UNIQUE(school, class_level, cycle)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS roster_students(
            id TEXT PRIMARY KEY,
            roster_id TEXT NOT NULL,
            record_key TEXT NOT NULL,
            pen_number TEXT NOT NULL,
            student_name TEXT NOT NULL,
            section TEXT NOT NULL DEFAULT '',
            sort_order INTEGER NOT NULL,
            marks_json TEXT NOT NULL,
            grand_total REAL NOT NULL DEFAULT 0,
            overall_grade TEXT NOT NULL DEFAULT '',
            gpa TEXT NOT NULL DEFAULT '',
            percentage TEXT NOT NULL DEFAULT '',
            updated_at TEXT,
            FOREIGN KEY(roster_id) REFERENCES rosters(id),
            UNIQUE(roster_id, record_key)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_roster_students_roster ON roster_students(roster_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let text: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match text {
        Some(t) => Ok(Some(serde_json::from_str(&t)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
