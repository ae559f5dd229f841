use rusqlite::Connection;
use std::path::Path;
use uuid::Uuid;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("portal.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL,
            name TEXT NOT NULL,
            account_type TEXT NOT NULL,
            role TEXT NOT NULL,
            status TEXT NOT NULL,
            student_id TEXT,
            department TEXT,
            field TEXT,
            email TEXT,
            phone TEXT,
            memo TEXT,
            non_curricular_score INTEGER NOT NULL DEFAULT 0,
            core_subject_score INTEGER NOT NULL DEFAULT 0,
            industry_score INTEGER NOT NULL DEFAULT 0,
            non_curricular_history TEXT NOT NULL DEFAULT '[]',
            core_subject_history TEXT NOT NULL DEFAULT '[]',
            industry_history TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_status ON users(status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_account_type ON users(account_type)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS programs(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            category TEXT NOT NULL,
            field TEXT NOT NULL,
            start_date TEXT,
            end_date TEXT,
            status TEXT NOT NULL,
            max_participants INTEGER,
            requires_file INTEGER NOT NULL DEFAULT 0,
            score INTEGER NOT NULL DEFAULT 0,
            description TEXT,
            image_url TEXT,
            attached_files TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_programs_field ON programs(field)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notices(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            field TEXT NOT NULL,
            content TEXT NOT NULL,
            author TEXT,
            date TEXT,
            views INTEGER NOT NULL DEFAULT 0,
            image_url TEXT,
            attached_files TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notices_field ON notices(field)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS program_applications(
            id TEXT PRIMARY KEY,
            program_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL,
            applied_date TEXT NOT NULL,
            completed_date TEXT,
            attached_files TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            FOREIGN KEY(program_id) REFERENCES programs(id),
            FOREIGN KEY(student_id) REFERENCES users(id),
            UNIQUE(program_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_applications_program ON program_applications(program_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_applications_student ON program_applications(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS core_courses(
            id TEXT PRIMARY KEY,
            field TEXT NOT NULL,
            department TEXT NOT NULL,
            course_code TEXT NOT NULL,
            course_name TEXT NOT NULL,
            course_type TEXT NOT NULL,
            credits INTEGER NOT NULL DEFAULT 3,
            order_index INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_core_courses_dept ON core_courses(field, department)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS core_courses_submissions(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL UNIQUE,
            completed_courses TEXT NOT NULL DEFAULT '[]',
            total_completed_count INTEGER NOT NULL DEFAULT 0,
            total_score INTEGER NOT NULL DEFAULT 0,
            transcript_file TEXT,
            transcript_file_name TEXT,
            transcript_file_size INTEGER,
            transcript_checksum TEXT,
            status TEXT NOT NULL,
            submitted_at TEXT,
            approved_at TEXT,
            rejection_reason TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_status ON core_courses_submissions(status)",
        [],
    )?;

    // Databases created before attachments moved inline may lack these columns.
    ensure_applications_attached_files(&conn)?;
    ensure_submissions_checksum(&conn)?;

    seed_master_account(&conn)?;

    Ok(conn)
}

fn ensure_applications_attached_files(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "program_applications", "attached_files")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE program_applications ADD COLUMN attached_files TEXT NOT NULL DEFAULT '[]'",
        [],
    )?;
    Ok(())
}

fn ensure_submissions_checksum(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "core_courses_submissions", "transcript_checksum")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE core_courses_submissions ADD COLUMN transcript_checksum TEXT",
        [],
    )?;
    Ok(())
}

/// The approval workflow needs at least one master account to exist before
/// anyone can sign up, so a fresh database gets a default one.
fn seed_master_account(conn: &Connection) -> anyhow::Result<()> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE account_type = 'master'",
        [],
        |r| r.get(0),
    )?;
    if count > 0 {
        return Ok(());
    }
    conn.execute(
        "INSERT INTO users(id, username, password, name, account_type, role, status, created_at)
         VALUES(?, 'master', 'master1234', '마스터 관리자', 'master', 'master', 'approved', ?)",
        (Uuid::new_v4().to_string(), crate::scoring::today()),
    )?;
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
