use chrono::{Datelike, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "feedesk.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS counters(
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS universities(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS academic_sessions(
            id TEXT PRIMARY KEY,
            session_name TEXT NOT NULL UNIQUE,
            start_date TEXT,
            end_date TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS agents(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            contact_person TEXT NOT NULL,
            email TEXT NOT NULL,
            phone TEXT,
            location TEXT,
            commission_rate REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'Active',
            created_at TEXT NOT NULL,
            updated_at TEXT
        );

        CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            father_name TEXT NOT NULL DEFAULT '',
            mother_name TEXT NOT NULL DEFAULT '',
            date_of_birth TEXT,
            phone_number TEXT,
            email TEXT,
            university_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            academic_session_id TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            admission_number TEXT UNIQUE,
            city TEXT,
            country TEXT,
            address TEXT,
            aadhaar_number TEXT,
            passport_number TEXT,
            twelfth_marks REAL,
            seat_number TEXT,
            agent_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(university_id) REFERENCES universities(id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(academic_session_id) REFERENCES academic_sessions(id),
            FOREIGN KEY(agent_id) REFERENCES agents(id)
        );
        CREATE INDEX IF NOT EXISTS idx_students_program ON students(university_id, course_id);

        CREATE TABLE IF NOT EXISTS fee_types(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            category TEXT NOT NULL DEFAULT 'General',
            frequency TEXT NOT NULL DEFAULT 'one-time',
            status TEXT NOT NULL DEFAULT 'active',
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT
        );

        CREATE TABLE IF NOT EXISTS fee_structures(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            university_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(university_id) REFERENCES universities(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        );
        CREATE INDEX IF NOT EXISTS idx_fee_structures_program ON fee_structures(university_id, course_id);

        CREATE TABLE IF NOT EXISTS fee_structure_components(
            id TEXT PRIMARY KEY,
            fee_structure_id TEXT NOT NULL,
            fee_type_id TEXT NOT NULL,
            amount REAL NOT NULL,
            frequency TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(fee_structure_id) REFERENCES fee_structures(id),
            FOREIGN KEY(fee_type_id) REFERENCES fee_types(id)
        );
        CREATE INDEX IF NOT EXISTS idx_components_structure ON fee_structure_components(fee_structure_id);

        CREATE TABLE IF NOT EXISTS student_fee_assignments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            fee_structure_id TEXT NOT NULL,
            assigned_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(fee_structure_id) REFERENCES fee_structures(id),
            UNIQUE(student_id, fee_structure_id)
        );

        CREATE TABLE IF NOT EXISTS fee_payments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            fee_structure_component_id TEXT NOT NULL,
            amount_due REAL NOT NULL,
            amount_paid REAL NOT NULL DEFAULT 0,
            payment_status TEXT NOT NULL DEFAULT 'pending',
            due_date TEXT,
            last_payment_date TEXT,
            version INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(fee_structure_component_id) REFERENCES fee_structure_components(id),
            UNIQUE(student_id, fee_structure_component_id)
        );
        CREATE INDEX IF NOT EXISTS idx_fee_payments_student ON fee_payments(student_id);

        CREATE TABLE IF NOT EXISTS fee_collections(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            fee_type_id TEXT NOT NULL,
            amount_paid REAL NOT NULL,
            payment_date TEXT NOT NULL,
            payment_method TEXT NOT NULL,
            receipt_number TEXT NOT NULL UNIQUE,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(fee_type_id) REFERENCES fee_types(id)
        );
        CREATE INDEX IF NOT EXISTS idx_fee_collections_student ON fee_collections(student_id);

        CREATE TABLE IF NOT EXISTS hostels(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            location TEXT NOT NULL,
            capacity INTEGER NOT NULL DEFAULT 0,
            current_occupancy INTEGER NOT NULL DEFAULT 0,
            monthly_rent REAL NOT NULL DEFAULT 0,
            contact_person TEXT,
            phone TEXT,
            email TEXT,
            address TEXT,
            facilities TEXT,
            status TEXT NOT NULL DEFAULT 'Active',
            created_at TEXT NOT NULL,
            updated_at TEXT
        );

        CREATE TABLE IF NOT EXISTS mess_expenses(
            id TEXT PRIMARY KEY,
            hostel_id TEXT,
            expense_type TEXT NOT NULL,
            description TEXT,
            amount REAL NOT NULL,
            expense_date TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT 'General',
            payment_method TEXT NOT NULL DEFAULT 'Cash',
            receipt_number TEXT,
            vendor_name TEXT,
            notes TEXT,
            status TEXT NOT NULL DEFAULT 'Pending',
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(hostel_id) REFERENCES hostels(id)
        );

        CREATE TABLE IF NOT EXISTS expenses(
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            title TEXT NOT NULL,
            amount REAL NOT NULL,
            expense_date TEXT NOT NULL,
            payee TEXT,
            notes TEXT,
            status TEXT NOT NULL DEFAULT 'Pending',
            created_at TEXT NOT NULL,
            updated_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_expenses_kind ON expenses(kind);",
    )?;

    Ok(conn)
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
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

fn next_counter(conn: &Connection, name: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "INSERT INTO counters(name, value) VALUES(?, 1)
         ON CONFLICT(name) DO UPDATE SET value = value + 1
         RETURNING value",
        [name],
        |r| r.get(0),
    )
}

/// `ADM-<year>-<seq>`; the sequence restarts every calendar year.
pub fn next_admission_number(conn: &Connection) -> rusqlite::Result<String> {
    let year = Utc::now().year();
    let seq = next_counter(conn, &format!("admission.{year}"))?;
    Ok(format!("ADM-{year}-{seq:04}"))
}

pub fn next_receipt_number(conn: &Connection) -> rusqlite::Result<String> {
    let year = Utc::now().year();
    let seq = next_counter(conn, &format!("receipt.{year}"))?;
    Ok(format!("RCPT-{year}-{seq:06}"))
}
