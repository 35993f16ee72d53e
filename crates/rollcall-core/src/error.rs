use crate::capture::CaptureError;
use crate::ports::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable, machine-readable classification of pipeline outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidIdentity,
    AlreadyEnrolled,
    NoFaceDetected,
    Unrecognized,
    StorageFailure,
    ResolutionFallback,
    InvalidImage,
    Timeout,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidIdentity => "invalid_identity",
            ErrorKind::AlreadyEnrolled => "already_enrolled",
            ErrorKind::NoFaceDetected => "no_face_detected",
            ErrorKind::Unrecognized => "unrecognized",
            ErrorKind::StorageFailure => "storage_failure",
            ErrorKind::ResolutionFallback => "resolution_fallback",
            ErrorKind::InvalidImage => "invalid_image",
            ErrorKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("student {0} is not on the roster")]
    InvalidIdentity(String),
    #[error("student {0} already has a registered face")]
    AlreadyEnrolled(String),
    #[error("no face detected in image {}", .image_index + 1)]
    NoFaceDetected { image_index: usize },
    #[error("expected {expected} images, got {actual}")]
    WrongImageCount { expected: usize, actual: usize },
    #[error("invalid image: {0}")]
    Capture(#[from] CaptureError),
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidIdentity(_) => ErrorKind::InvalidIdentity,
            PipelineError::AlreadyEnrolled(_) => ErrorKind::AlreadyEnrolled,
            PipelineError::NoFaceDetected { .. } => ErrorKind::NoFaceDetected,
            PipelineError::WrongImageCount { .. } | PipelineError::Capture(_) => ErrorKind::InvalidImage,
            PipelineError::Storage(_) => ErrorKind::StorageFailure,
        }
    }
}
