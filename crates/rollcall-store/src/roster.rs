//! Student registry.

use crate::db::{format_datetime, Database};
use crate::error::{DbError, Result};
use chrono::Local;
use rollcall_core::{PersonName, Roster, StoreError};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub student_id: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
}

impl Student {
    pub fn new(
        student_id: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            student_id: student_id.into(),
            first_name: first_name.into(),
            middle_name: None,
            last_name: last_name.into(),
        }
    }

    pub fn person_name(&self) -> PersonName {
        PersonName {
            first: self.first_name.clone(),
            middle: self.middle_name.clone(),
            last: self.last_name.clone(),
        }
    }

    /// "First [Middle] Last".
    pub fn display_name(&self) -> String {
        self.person_name().to_string()
    }

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            student_id: row.get(0)?,
            first_name: row.get(1)?,
            middle_name: row.get(2)?,
            last_name: row.get(3)?,
        })
    }
}

pub(crate) const STUDENT_COLUMNS: &str = "student_id, first_name, middle_name, last_name";

impl Database {
    pub fn add_student(&self, student: &Student) -> Result<()> {
        if student.student_id.trim().is_empty() {
            return Err(DbError::InvalidInput("student id is empty".into()));
        }
        self.conn().execute(
            "INSERT INTO students (student_id, first_name, middle_name, last_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                student.student_id,
                student.first_name,
                student.middle_name,
                student.last_name,
                format_datetime(Local::now().naive_local()),
            ],
        )?;
        tracing::debug!(student_id = %student.student_id, "student added");
        Ok(())
    }

    pub fn get_student(&self, student_id: &str) -> Result<Option<Student>> {
        let student = self
            .conn()
            .query_row(
                &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE student_id = ?1"),
                params![student_id],
                Student::from_row,
            )
            .optional()?;
        Ok(student)
    }

    /// All students, ordered by last then first name.
    pub fn list_students(&self) -> Result<Vec<Student>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students ORDER BY last_name, first_name, student_id"
        ))?;
        let students = stmt
            .query_map([], Student::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(students)
    }

    /// Remove a student and their enrollments. Attendance history and any
    /// face descriptor are left in place.
    pub fn remove_student(&self, student_id: &str) -> Result<bool> {
        let removed = self
            .conn()
            .execute("DELETE FROM students WHERE student_id = ?1", params![student_id])?;
        Ok(removed > 0)
    }
}

impl Roster for Database {
    fn exists(&self, person_id: &str) -> std::result::Result<bool, StoreError> {
        Ok(self.get_student(person_id)?.is_some())
    }

    fn display_name(&self, person_id: &str) -> std::result::Result<Option<String>, StoreError> {
        Ok(self.get_student(person_id)?.map(|s| s.display_name()))
    }
}
