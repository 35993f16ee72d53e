//! Attendance records and monthly reporting queries.

use crate::db::{format_date, format_datetime, parse_date, Database};
use crate::error::{DbError, Result};
use chrono::{Local, NaiveDate};
use rollcall_core::report::{month_range, school_days, StudentAttendance};
use rollcall_core::types::{RecorderId, UnknownStatus};
use rollcall_core::{
    AttendanceEvent, AttendanceSink, AttendanceStatus, PersonName, SectionId, StoreError, SubjectId,
};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

const UPSERT_SQL: &str = "INSERT INTO attendance_records
        (student_id, subject_id, section_id, attendance_date, status, recorded_by, recorded_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    ON CONFLICT (student_id, subject_id, section_id, attendance_date)
    DO UPDATE SET status = excluded.status,
                  recorded_by = excluded.recorded_by,
                  recorded_at = excluded.recorded_at";

/// Aggregate figures for one section/subject/month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthStatistics {
    pub total_students: usize,
    pub total_days: usize,
    pub total_records: usize,
    pub total_present: usize,
    pub total_absent: usize,
    /// Present over all records, rounded to two decimals.
    pub attendance_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerateSummary {
    pub inserted: usize,
    pub students: usize,
    pub days: usize,
}

fn upsert_with(conn: &Connection, event: &AttendanceEvent) -> rusqlite::Result<usize> {
    conn.execute(
        UPSERT_SQL,
        params![
            event.person_id,
            event.subject_id,
            event.section_id,
            format_date(event.date),
            event.status.as_str(),
            event.recorded_by,
            format_datetime(event.recorded_at),
        ],
    )
}

fn to_usize(value: i64) -> Result<usize> {
    usize::try_from(value).map_err(|_| DbError::InvalidValue(format!("count {value}")))
}

fn month_bounds(year: i32, month: u32) -> Result<(String, String)> {
    let (first, last) = month_range(year, month)
        .ok_or_else(|| DbError::InvalidInput(format!("invalid month {year}-{month}")))?;
    Ok((format_date(first), format_date(last)))
}

impl Database {
    pub fn upsert_attendance(&self, event: &AttendanceEvent) -> Result<()> {
        upsert_with(&self.conn(), event)?;
        Ok(())
    }

    /// Upsert many marks in one transaction; all or nothing.
    pub fn bulk_upsert(&self, events: &[AttendanceEvent]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for event in events {
            upsert_with(&tx, event)?;
        }
        tx.commit()?;
        Ok(events.len())
    }

    /// Marks for a month grouped per student. Every enrolled student appears,
    /// marked or not, ordered by name; students with marks who are no longer
    /// enrolled follow, ordered by id.
    pub fn monthly_records(
        &self,
        section_id: SectionId,
        subject_id: SubjectId,
        year: i32,
        month: u32,
    ) -> Result<Vec<StudentAttendance>> {
        let (from, to) = month_bounds(year, month)?;

        let mut report: Vec<StudentAttendance> = self
            .enrolled_students(section_id, subject_id)?
            .into_iter()
            .map(|s| StudentAttendance {
                name: s.display_name(),
                person_id: s.student_id,
                marks: BTreeMap::new(),
            })
            .collect();
        let mut index: HashMap<String, usize> = report
            .iter()
            .enumerate()
            .map(|(i, row)| (row.person_id.clone(), i))
            .collect();
        let enrolled = report.len();

        let rows = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT a.student_id, a.attendance_date, a.status,
                        s.first_name, s.middle_name, s.last_name
                 FROM attendance_records a
                 LEFT JOIN students s ON s.student_id = a.student_id
                 WHERE a.section_id = ?1 AND a.subject_id = ?2
                   AND a.attendance_date BETWEEN ?3 AND ?4
                 ORDER BY a.attendance_date",
            )?;
            let rows = stmt
                .query_map(params![section_id, subject_id, from, to], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        for (student_id, date, status, first, middle, last) in rows {
            let status: AttendanceStatus = status
                .parse()
                .map_err(|e: UnknownStatus| DbError::InvalidValue(e.to_string()))?;
            let date = parse_date(&date)?;
            let slot = match index.get(&student_id) {
                Some(&slot) => slot,
                None => {
                    // Marked but no longer enrolled (or no longer on the roster).
                    let name = match (first, last) {
                        (Some(first), Some(last)) => PersonName { first, middle, last }.to_string(),
                        _ => student_id.clone(),
                    };
                    report.push(StudentAttendance {
                        person_id: student_id.clone(),
                        name,
                        marks: BTreeMap::new(),
                    });
                    index.insert(student_id, report.len() - 1);
                    report.len() - 1
                }
            };
            report[slot].marks.insert(date, status);
        }

        report[enrolled..].sort_by(|a, b| a.person_id.cmp(&b.person_id));
        Ok(report)
    }

    pub fn statistics(
        &self,
        section_id: SectionId,
        subject_id: SubjectId,
        year: i32,
        month: u32,
    ) -> Result<MonthStatistics> {
        let (from, to) = month_bounds(year, month)?;
        let (students, days, records, present, absent): (i64, i64, i64, i64, i64) = self.conn().query_row(
            "SELECT COUNT(DISTINCT student_id),
                    COUNT(DISTINCT attendance_date),
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN status = 'Present' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'Absent' THEN 1 ELSE 0 END), 0)
             FROM attendance_records
             WHERE section_id = ?1 AND subject_id = ?2
               AND attendance_date BETWEEN ?3 AND ?4",
            params![section_id, subject_id, from, to],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )?;

        let attendance_percentage = if records > 0 {
            (present as f64 * 100.0 / records as f64 * 100.0).round() / 100.0
        } else {
            0.0
        };
        Ok(MonthStatistics {
            total_students: to_usize(students)?,
            total_days: to_usize(days)?,
            total_records: to_usize(records)?,
            total_present: to_usize(present)?,
            total_absent: to_usize(absent)?,
            attendance_percentage,
        })
    }

    /// Seed an Absent mark for every enrolled student on every school day of
    /// the month. Existing marks are kept.
    pub fn generate_month(
        &self,
        section_id: SectionId,
        subject_id: SubjectId,
        year: i32,
        month: u32,
        recorded_by: RecorderId,
    ) -> Result<GenerateSummary> {
        month_bounds(year, month)?;
        let students = self.enrolled_students(section_id, subject_id)?;
        let days = school_days(year, month);
        if students.is_empty() {
            return Ok(GenerateSummary {
                inserted: 0,
                students: 0,
                days: days.len(),
            });
        }

        let recorded_at = format_datetime(Local::now().naive_local());
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO attendance_records
                     (student_id, subject_id, section_id, attendance_date, status, recorded_by, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for student in &students {
                for day in &days {
                    inserted += stmt.execute(params![
                        student.student_id,
                        subject_id,
                        section_id,
                        format_date(day.date),
                        AttendanceStatus::Absent.as_str(),
                        recorded_by,
                        recorded_at,
                    ])?;
                }
            }
        }
        tx.commit()?;

        tracing::info!(section_id, subject_id, year, month, inserted, "monthly attendance generated");
        Ok(GenerateSummary {
            inserted,
            students: students.len(),
            days: days.len(),
        })
    }

    /// Delete marks dated within `from..=to`.
    pub fn delete_range(
        &self,
        section_id: SectionId,
        subject_id: SubjectId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM attendance_records
             WHERE section_id = ?1 AND subject_id = ?2
               AND attendance_date BETWEEN ?3 AND ?4",
            params![section_id, subject_id, format_date(from), format_date(to)],
        )?;
        Ok(removed)
    }

    pub fn records_exist(&self, section_id: SectionId, subject_id: SubjectId, year: i32, month: u32) -> Result<bool> {
        let (from, to) = month_bounds(year, month)?;
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM attendance_records
             WHERE section_id = ?1 AND subject_id = ?2
               AND attendance_date BETWEEN ?3 AND ?4",
            params![section_id, subject_id, from, to],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

impl AttendanceSink for Database {
    fn upsert(&self, event: &AttendanceEvent) -> std::result::Result<(), StoreError> {
        Ok(self.upsert_attendance(event)?)
    }
}
