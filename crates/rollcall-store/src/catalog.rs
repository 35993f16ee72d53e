//! Subjects, sections, rooms, class schedules and subject enrollments.

use crate::db::{format_time, Database};
use crate::error::{DbError, Result};
use crate::roster::Student;
use chrono::NaiveTime;
use rollcall_core::{RoomId, SectionId, SectionResolver, StoreError, SubjectId};
use rusqlite::params;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subject {
    pub subject_id: SubjectId,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub section_id: SectionId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Room {
    pub room_id: RoomId,
    pub name: String,
}

impl Database {
    pub fn add_subject(&self, code: &str, name: &str) -> Result<SubjectId> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO subjects (code, name) VALUES (?1, ?2)",
            params![code, name],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_subjects(&self) -> Result<Vec<Subject>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT subject_id, code, name FROM subjects ORDER BY name")?;
        let subjects = stmt
            .query_map([], |row| {
                Ok(Subject {
                    subject_id: row.get(0)?,
                    code: row.get(1)?,
                    name: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(subjects)
    }

    pub fn add_section(&self, name: &str) -> Result<SectionId> {
        let conn = self.conn();
        conn.execute("INSERT INTO sections (name) VALUES (?1)", params![name])?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_sections(&self) -> Result<Vec<Section>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT section_id, name FROM sections ORDER BY name")?;
        let sections = stmt
            .query_map([], |row| {
                Ok(Section {
                    section_id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sections)
    }

    pub fn add_room(&self, name: &str) -> Result<RoomId> {
        let conn = self.conn();
        conn.execute("INSERT INTO rooms (name) VALUES (?1)", params![name])?;
        Ok(conn.last_insert_rowid())
    }

    pub fn list_rooms(&self) -> Result<Vec<Room>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT room_id, name FROM rooms ORDER BY name")?;
        let rooms = stmt
            .query_map([], |row| {
                Ok(Room {
                    room_id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rooms)
    }

    /// Schedule `subject` for `section` in `room`, optionally within a daily
    /// time window. Re-assigning the same triple replaces the window.
    pub fn assign_schedule(
        &self,
        section_id: SectionId,
        subject_id: SubjectId,
        room_id: RoomId,
        start: Option<NaiveTime>,
        end: Option<NaiveTime>,
    ) -> Result<()> {
        if let (Some(start), Some(end)) = (start, end) {
            if start >= end {
                return Err(DbError::InvalidInput(format!(
                    "schedule window {start}..{end} is empty"
                )));
            }
        }
        self.conn().execute(
            "INSERT INTO section_subjects (section_id, subject_id, room_id, start_time, end_time)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (section_id, subject_id, room_id)
             DO UPDATE SET start_time = excluded.start_time, end_time = excluded.end_time",
            params![
                section_id,
                subject_id,
                room_id,
                start.map(format_time),
                end.map(format_time),
            ],
        )?;
        Ok(())
    }

    /// Enroll students in a section's subject. Already-enrolled students are
    /// skipped; returns how many were newly enrolled.
    pub fn enroll_students(
        &self,
        section_id: SectionId,
        subject_id: SubjectId,
        student_ids: &[String],
    ) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO subject_enrollments (section_id, subject_id, student_id)
                 VALUES (?1, ?2, ?3)",
            )?;
            for student_id in student_ids {
                inserted += stmt.execute(params![section_id, subject_id, student_id])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn enrolled_students(&self, section_id: SectionId, subject_id: SubjectId) -> Result<Vec<Student>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT s.student_id, s.first_name, s.middle_name, s.last_name
             FROM students s
             JOIN subject_enrollments e ON e.student_id = s.student_id
             WHERE e.section_id = ?1 AND e.subject_id = ?2
             ORDER BY s.last_name, s.first_name, s.student_id",
        )?;
        let students = stmt
            .query_map(params![section_id, subject_id], Student::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(students)
    }

    /// Section taught in `room_id` for `subject_id`: the lowest section id
    /// scheduled for the pair. Schedule windows never select between sections.
    pub fn resolve_section(&self, room_id: RoomId, subject_id: SubjectId) -> Result<Option<SectionId>> {
        let section_id = self
            .conn()
            .query_row(
                "SELECT MIN(section_id) FROM section_subjects
                 WHERE room_id = ?1 AND subject_id = ?2",
                params![room_id, subject_id],
                |row| row.get::<_, Option<SectionId>>(0),
            )?;
        Ok(section_id)
    }
}

impl SectionResolver for Database {
    fn section_for(
        &self,
        room_id: RoomId,
        subject_id: SubjectId,
    ) -> std::result::Result<Option<SectionId>, StoreError> {
        Ok(self.resolve_section(room_id, subject_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(hour: u32, minute: u32) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(hour, minute, 0)
    }

    #[test]
    fn test_catalog_lists() {
        let db = Database::open_in_memory().unwrap();
        let math = db.add_subject("MATH7", "Mathematics").unwrap();
        db.add_subject("ENG7", "English").unwrap();
        db.add_section("Grade 7 - Rizal").unwrap();
        db.add_room("Room 101").unwrap();

        let subjects = db.list_subjects().unwrap();
        assert_eq!(subjects.len(), 2);
        assert_eq!(subjects[0].name, "English");
        assert_eq!(subjects[1].subject_id, math);
        assert_eq!(db.list_sections().unwrap()[0].name, "Grade 7 - Rizal");
        assert_eq!(db.list_rooms().unwrap()[0].name, "Room 101");
    }

    #[test]
    fn test_resolution_ignores_time_of_day() {
        let db = Database::open_in_memory().unwrap();
        let subject = db.add_subject("MATH7", "Mathematics").unwrap();
        let morning = db.add_section("Rizal").unwrap();
        let afternoon = db.add_section("Bonifacio").unwrap();
        let room = db.add_room("Room 101").unwrap();
        let other_room = db.add_room("Room 102").unwrap();

        db.assign_schedule(afternoon, subject, room, time(13, 0), time(14, 0)).unwrap();
        assert_eq!(db.section_for(room, subject).unwrap(), Some(afternoon));

        db.assign_schedule(morning, subject, room, time(8, 0), time(9, 0)).unwrap();
        assert_eq!(db.section_for(room, subject).unwrap(), Some(morning));
        assert_eq!(db.section_for(other_room, subject).unwrap(), None);
    }

    #[test]
    fn test_empty_schedule_window_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let subject = db.add_subject("MATH7", "Mathematics").unwrap();
        let section = db.add_section("Rizal").unwrap();
        let room = db.add_room("Room 101").unwrap();
        assert!(matches!(
            db.assign_schedule(section, subject, room, time(9, 0), time(8, 0)),
            Err(DbError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_enrollment_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let subject = db.add_subject("MATH7", "Mathematics").unwrap();
        let section = db.add_section("Rizal").unwrap();
        db.add_student(&Student::new("S100", "Ana", "Reyes")).unwrap();
        db.add_student(&Student::new("S200", "Ben", "Cruz")).unwrap();

        let ids = vec!["S100".to_string(), "S200".to_string()];
        assert_eq!(db.enroll_students(section, subject, &ids).unwrap(), 2);
        assert_eq!(db.enroll_students(section, subject, &ids).unwrap(), 0);

        let enrolled = db.enrolled_students(section, subject).unwrap();
        assert_eq!(enrolled.len(), 2);
        assert_eq!(enrolled[0].student_id, "S200");

        db.remove_student("S200").unwrap();
        assert_eq!(db.enrolled_students(section, subject).unwrap().len(), 1);
    }

    #[test]
    fn test_enrolling_unknown_student_fails_whole_batch() {
        let db = Database::open_in_memory().unwrap();
        let subject = db.add_subject("MATH7", "Mathematics").unwrap();
        let section = db.add_section("Rizal").unwrap();
        db.add_student(&Student::new("S100", "Ana", "Reyes")).unwrap();

        let ids = vec!["S100".to_string(), "S404".to_string()];
        assert!(db.enroll_students(section, subject, &ids).is_err());
        assert!(db.enrolled_students(section, subject).unwrap().is_empty());
    }
}
