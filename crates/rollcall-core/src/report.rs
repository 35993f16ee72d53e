//! School calendar and monthly attendance reports.

use crate::types::{AttendanceStatus, PersonId};
use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchoolDay {
    pub date: NaiveDate,
    /// Short English weekday name ("Mon".."Fri").
    pub weekday: String,
}

/// First and last calendar day of a month, or `None` for an invalid month.
pub fn month_range(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((first, next.pred_opt()?))
}

/// Monday to Friday of the given month.
pub fn school_days(year: i32, month: u32) -> Vec<SchoolDay> {
    let Some((first, last)) = month_range(year, month) else {
        return Vec::new();
    };
    first
        .iter_days()
        .take_while(|date| *date <= last)
        .filter(|date| !matches!(date.weekday(), Weekday::Sat | Weekday::Sun))
        .map(|date| SchoolDay {
            date,
            weekday: date.weekday().to_string(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttendanceStats {
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub excused: usize,
    pub total: usize,
    /// Present over total, rounded to the nearest whole percent.
    pub percentage: u32,
}

impl AttendanceStats {
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = AttendanceStatus>,
    {
        let mut stats = AttendanceStats::default();
        for status in statuses {
            match status {
                AttendanceStatus::Present => stats.present += 1,
                AttendanceStatus::Absent => stats.absent += 1,
                AttendanceStatus::Late => stats.late += 1,
                AttendanceStatus::Excused => stats.excused += 1,
            }
            stats.total += 1;
        }
        if stats.total > 0 {
            stats.percentage = (stats.present as f64 * 100.0 / stats.total as f64).round() as u32;
        }
        stats
    }
}

/// One student's marks for a month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentAttendance {
    pub person_id: PersonId,
    pub name: String,
    pub marks: BTreeMap<NaiveDate, AttendanceStatus>,
}

impl StudentAttendance {
    pub fn stats(&self) -> AttendanceStats {
        AttendanceStats::from_statuses(self.marks.values().copied())
    }
}

fn mark_letter(status: AttendanceStatus) -> &'static str {
    match status {
        AttendanceStatus::Present => "P",
        AttendanceStatus::Absent => "A",
        AttendanceStatus::Late => "L",
        AttendanceStatus::Excused => "E",
    }
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Render a month grid as CSV. Days without a mark count as absent in the grid.
pub fn export_csv(rows: &[StudentAttendance], days: &[SchoolDay]) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);

    let mut header = vec!["Student ID".to_string(), "Student Name".to_string()];
    header.extend(days.iter().map(|day| day.date.to_string()));
    header.extend(["Present", "Absent", "Total", "Percentage"].map(String::from));
    lines.push(header);

    for row in rows {
        let stats = row.stats();
        let mut fields = vec![row.person_id.clone(), row.name.clone()];
        fields.extend(days.iter().map(|day| {
            let status = row.marks.get(&day.date).copied().unwrap_or(AttendanceStatus::Absent);
            mark_letter(status).to_string()
        }));
        fields.push(stats.present.to_string());
        fields.push(stats.absent.to_string());
        fields.push(stats.total.to_string());
        fields.push(format!("{}%", stats.percentage));
        lines.push(fields);
    }

    lines
        .iter()
        .map(|fields| fields.iter().map(|f| quote(f)).collect::<Vec<_>>().join(","))
        .collect::<Vec<_>>()
        .join("\n")
}
