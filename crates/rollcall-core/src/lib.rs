//! rollcall-core — face-recognition attendance pipeline.
//!
//! SCRFD face detection and a compact embedding network run via ONNX Runtime
//! on CPU. On top of them sit the enrollment, recognition and attendance
//! workflows, written against the collaborator traits in [`ports`].

pub mod alignment;
pub mod attendance;
pub mod capture;
pub mod config;
pub mod detector;
pub mod embedder;
pub mod enroll;
pub mod error;
pub mod matcher;
pub mod orientation;
pub mod ports;
pub mod recognize;
pub mod recognizer;
pub mod report;
pub mod types;

#[cfg(test)]
mod testing;

pub use attendance::AttendanceRecorder;
pub use capture::{decode_capture, CaptureError, CapturedImage, ImageKind};
pub use config::{ConfigError, PipelineConfig};
pub use embedder::{FaceEmbedder, OnnxEmbedder};
pub use enroll::{EnrollOutcome, EnrollRequest, Enrollment};
pub use error::{ErrorKind, PipelineError};
pub use matcher::{EuclideanMatcher, Matcher};
pub use orientation::{check_orientation, classify, Orientation};
pub use ports::{AttendanceSink, DescriptorStore, FaceImageStore, Roster, SectionResolver, StoreError};
pub use recognize::{CheckInContext, Recognition, RecognitionOutcome};
pub use report::{export_csv, school_days, AttendanceStats, SchoolDay, StudentAttendance};
pub use types::{
    AttendanceEvent, AttendanceStatus, BoundingBox, DescriptorRecord, Embedding, FaceSample,
    MatchResult, PersonId, PersonName, RoomId, SectionId, SubjectId,
};
