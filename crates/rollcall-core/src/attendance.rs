//! Automatic attendance marks for recognized students.

use crate::config::PipelineConfig;
use crate::error::ErrorKind;
use crate::ports::{AttendanceSink, SectionResolver, StoreError};
use crate::types::{AttendanceEvent, AttendanceStatus, RoomId, SubjectId};
use chrono::{Local, NaiveDateTime};

pub struct AttendanceRecorder<'a> {
    resolver: &'a dyn SectionResolver,
    sink: &'a dyn AttendanceSink,
    config: &'a PipelineConfig,
}

impl<'a> AttendanceRecorder<'a> {
    pub fn new(
        resolver: &'a dyn SectionResolver,
        sink: &'a dyn AttendanceSink,
        config: &'a PipelineConfig,
    ) -> Self {
        Self { resolver, sink, config }
    }

    /// Mark `person_id` present today for the subject taught in `room_id`.
    pub fn record(
        &self,
        person_id: &str,
        subject_id: SubjectId,
        room_id: RoomId,
    ) -> Result<AttendanceEvent, StoreError> {
        self.record_at(person_id, subject_id, room_id, Local::now().naive_local())
    }

    /// As [`record`](Self::record), at an explicit local time.
    ///
    /// Repeated calls on the same day for the same person and subject land on
    /// the same row: the sink upserts on (person, subject, section, date).
    pub fn record_at(
        &self,
        person_id: &str,
        subject_id: SubjectId,
        room_id: RoomId,
        now: NaiveDateTime,
    ) -> Result<AttendanceEvent, StoreError> {
        let section_id = match self.resolver.section_for(room_id, subject_id)? {
            Some(section_id) => section_id,
            None => {
                tracing::info!(
                    room_id,
                    subject_id,
                    section_id = self.config.default_section_id,
                    kind = %ErrorKind::ResolutionFallback,
                    "no section scheduled for room and subject; using default section"
                );
                self.config.default_section_id
            }
        };

        let event = AttendanceEvent {
            person_id: person_id.to_string(),
            subject_id,
            section_id,
            date: now.date(),
            status: AttendanceStatus::Present,
            recorded_by: self.config.system_recorder_id,
            recorded_at: now,
        };
        self.sink.upsert(&event)?;

        tracing::info!(person_id, subject_id, section_id, date = %event.date, "attendance recorded");
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, MemoryStore};

    #[test]
    fn test_scheduled_section_is_used() {
        let store = MemoryStore::default();
        store.schedule(3, 10, 42);
        let config = PipelineConfig::default();
        let recorder = AttendanceRecorder::new(&store, &store, &config);

        let event = recorder.record_at("S100", 10, 3, at(2026, 10, 19, 8, 30)).unwrap();
        assert_eq!(event.section_id, 42);
        assert_eq!(event.status, AttendanceStatus::Present);
        assert_eq!(event.recorded_by, config.system_recorder_id);
        assert_eq!(store.attendance().len(), 1);
    }

    #[test]
    fn test_missing_schedule_falls_back_to_default_section() {
        let store = MemoryStore::default();
        let config = PipelineConfig {
            default_section_id: 9,
            ..PipelineConfig::default()
        };
        let recorder = AttendanceRecorder::new(&store, &store, &config);

        let event = recorder.record_at("S100", 10, 3, at(2026, 10, 19, 8, 30)).unwrap();
        assert_eq!(event.section_id, 9);
    }

    #[test]
    fn test_same_day_is_idempotent() {
        let store = MemoryStore::default();
        store.schedule(3, 10, 42);
        let config = PipelineConfig::default();
        let recorder = AttendanceRecorder::new(&store, &store, &config);

        recorder.record_at("S100", 10, 3, at(2026, 10, 19, 8, 0)).unwrap();
        recorder.record_at("S100", 10, 3, at(2026, 10, 19, 13, 45)).unwrap();

        let rows = store.attendance();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].recorded_at, at(2026, 10, 19, 13, 45));
    }

    #[test]
    fn test_next_day_is_a_new_row() {
        let store = MemoryStore::default();
        let config = PipelineConfig::default();
        let recorder = AttendanceRecorder::new(&store, &store, &config);

        recorder.record_at("S100", 10, 3, at(2026, 10, 19, 8, 0)).unwrap();
        recorder.record_at("S100", 10, 3, at(2026, 10, 20, 8, 0)).unwrap();
        assert_eq!(store.attendance().len(), 2);
    }

    #[test]
    fn test_sink_failure_is_reported() {
        let store = MemoryStore::default();
        store.fail_attendance();
        let config = PipelineConfig::default();
        let recorder = AttendanceRecorder::new(&store, &store, &config);

        assert!(recorder.record_at("S100", 10, 3, at(2026, 10, 19, 8, 0)).is_err());
    }
}
