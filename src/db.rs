use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("resultd.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_no TEXT,
            name TEXT NOT NULL,
            active INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class_sort ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE,
            max_test1 REAL NOT NULL,
            max_test2 REAL NOT NULL,
            max_exam REAL NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cohorts(
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            term INTEGER NOT NULL,
            session TEXT NOT NULL,
            grade_scheme TEXT NOT NULL DEFAULT 'five_band',
            revision INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(subject_id, class_id, term, session)
        )",
        [],
    )?;
    ensure_cohorts_settings_columns(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cohorts_class ON cohorts(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cohorts_subject ON cohorts(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS score_entries(
            id TEXT PRIMARY KEY,
            cohort_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            test1 REAL,
            test2 REAL,
            exam REAL,
            updated_at TEXT,
            FOREIGN KEY(cohort_id) REFERENCES cohorts(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(cohort_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_score_entries_cohort ON score_entries(cohort_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_score_entries_student ON score_entries(student_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_cohorts_settings_columns(conn: &Connection) -> anyhow::Result<()> {
    // Early workspaces predate per-cohort grade schemes and revisions.
    if !table_has_column(conn, "cohorts", "grade_scheme")? {
        conn.execute(
            "ALTER TABLE cohorts ADD COLUMN grade_scheme TEXT NOT NULL DEFAULT 'five_band'",
            [],
        )?;
    }
    if !table_has_column(conn, "cohorts", "revision")? {
        conn.execute(
            "ALTER TABLE cohorts ADD COLUMN revision INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
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
