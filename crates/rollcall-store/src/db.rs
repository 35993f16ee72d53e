//! SQLite connection and schema.

use crate::error::{DbError, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS students (
    student_id   TEXT PRIMARY KEY,
    first_name   TEXT NOT NULL,
    middle_name  TEXT,
    last_name    TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS subjects (
    subject_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    code         TEXT NOT NULL UNIQUE,
    name         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sections (
    section_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name         TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS rooms (
    room_id      INTEGER PRIMARY KEY AUTOINCREMENT,
    name         TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS section_subjects (
    section_id   INTEGER NOT NULL REFERENCES sections(section_id) ON DELETE CASCADE,
    subject_id   INTEGER NOT NULL REFERENCES subjects(subject_id) ON DELETE CASCADE,
    room_id      INTEGER NOT NULL REFERENCES rooms(room_id) ON DELETE CASCADE,
    start_time   TEXT,
    end_time     TEXT,
    PRIMARY KEY (section_id, subject_id, room_id)
);

CREATE TABLE IF NOT EXISTS subject_enrollments (
    section_id   INTEGER NOT NULL REFERENCES sections(section_id) ON DELETE CASCADE,
    subject_id   INTEGER NOT NULL REFERENCES subjects(subject_id) ON DELETE CASCADE,
    student_id   TEXT NOT NULL REFERENCES students(student_id) ON DELETE CASCADE,
    PRIMARY KEY (section_id, subject_id, student_id)
);

CREATE TABLE IF NOT EXISTS attendance_records (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id      TEXT NOT NULL,
    subject_id      INTEGER NOT NULL,
    section_id      INTEGER NOT NULL,
    attendance_date TEXT NOT NULL,
    status          TEXT NOT NULL,
    recorded_by     INTEGER NOT NULL,
    recorded_at     TEXT NOT NULL,
    UNIQUE (student_id, subject_id, section_id, attendance_date)
);

CREATE INDEX IF NOT EXISTS idx_attendance_month
    ON attendance_records (section_id, subject_id, attendance_date);

CREATE TABLE IF NOT EXISTS face_descriptors (
    person_id    TEXT PRIMARY KEY,
    first_name   TEXT NOT NULL,
    middle_name  TEXT,
    last_name    TEXT NOT NULL,
    embeddings   TEXT NOT NULL,
    created_at   TEXT NOT NULL
);
"#;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The rollcall database. One connection, serialized behind a mutex.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let db = Self::init(conn)?;
        tracing::info!(path = %path.display(), "database opened");
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", 1)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A poisoned lock still guards a consistent connection: every write is
    /// a single statement or a transaction.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| DbError::InvalidValue(format!("date {value:?}")))
}

pub(crate) fn format_time(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

pub(crate) fn format_datetime(at: NaiveDateTime) -> String {
    at.format(DATETIME_FORMAT).to_string()
}

pub(crate) fn parse_datetime(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, DATETIME_FORMAT)
        .map_err(|_| DbError::InvalidValue(format!("timestamp {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rollcall.db");

        let db = Database::open(&path).unwrap();
        db.add_student(&crate::Student::new("S100", "Ana", "Reyes")).unwrap();
        drop(db);

        let db = Database::open(&path).unwrap();
        assert!(db.get_student("S100").unwrap().is_some());
    }

    #[test]
    fn test_time_formats() {
        let at = NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(8, 5, 0)
            .unwrap();
        assert_eq!(format_datetime(at), "2026-10-19 08:05:00");
        assert_eq!(parse_datetime("2026-10-19 08:05:00").unwrap(), at);
        assert_eq!(format_date(at.date()), "2026-10-19");
        assert_eq!(format_time(at.time()), "08:05:00");
        assert!(parse_date("19/10/2026").is_err());
    }
}
