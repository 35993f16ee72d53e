//! Collaborators the workflows depend on: roster, descriptor and image
//! persistence, room/subject→section resolution and the attendance sink.

use crate::capture::CapturedImage;
use crate::types::{AttendanceEvent, DescriptorRecord, RoomId, SectionId, SubjectId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("corrupt stored data: {0}")]
    Corrupt(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}

/// Read-only view of the student registry.
pub trait Roster: Send + Sync {
    fn exists(&self, person_id: &str) -> Result<bool, StoreError>;
    fn display_name(&self, person_id: &str) -> Result<Option<String>, StoreError>;
}

/// One descriptor record per person.
pub trait DescriptorStore: Send + Sync {
    /// Atomically insert `record` unless one already exists for its person.
    /// Returns `false` (and writes nothing) when a record was already present.
    fn create_if_absent(&self, record: &DescriptorRecord) -> Result<bool, StoreError>;
    fn exists(&self, person_id: &str) -> Result<bool, StoreError>;
    /// Every readable record, in a stable order. Undecodable records are skipped.
    fn load_all(&self) -> Result<Vec<DescriptorRecord>, StoreError>;
    /// Administrative removal. Returns whether a record existed.
    fn remove(&self, person_id: &str) -> Result<bool, StoreError>;
}

/// Reference images kept alongside descriptors, addressed by person and slot.
pub trait FaceImageStore: Send + Sync {
    fn save(&self, person_id: &str, slot: usize, image: &CapturedImage) -> Result<(), StoreError>;
    /// Delete every stored image of `person_id`, returning how many were removed.
    fn remove_all(&self, person_id: &str) -> Result<usize, StoreError>;
}

/// Which section is taught in a room for a subject.
///
/// The answer must not depend on the time of day: every check-in of one
/// person for a subject on a given day has to land on the same attendance row.
pub trait SectionResolver: Send + Sync {
    fn section_for(&self, room_id: RoomId, subject_id: SubjectId) -> Result<Option<SectionId>, StoreError>;
}

/// Attendance persistence keyed by (person, subject, section, date).
pub trait AttendanceSink: Send + Sync {
    fn upsert(&self, event: &AttendanceEvent) -> Result<(), StoreError>;
}
