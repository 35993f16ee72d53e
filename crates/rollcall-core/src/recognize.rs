//! Kiosk check-in: identify the face in a probe image and mark attendance.

use crate::attendance::AttendanceRecorder;
use crate::capture::CapturedImage;
use crate::config::PipelineConfig;
use crate::embedder::FaceEmbedder;
use crate::error::ErrorKind;
use crate::matcher::{EuclideanMatcher, Matcher};
use crate::ports::{DescriptorStore, Roster};
use crate::types::{AttendanceEvent, PersonId, RoomId, SubjectId};
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Where the capture happened; used only to resolve the attendance section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInContext {
    pub room_id: RoomId,
    pub subject_id: SubjectId,
}

/// Outcome of a recognition attempt. None of these is an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecognitionOutcome {
    NoFaceDetected,
    Unrecognized {
        best_distance: Option<f32>,
    },
    Matched {
        person_id: PersonId,
        display_name: String,
        distance: f32,
        /// `None` when recording failed; the match stands regardless.
        attendance: Option<AttendanceEvent>,
    },
}

impl RecognitionOutcome {
    /// Kind for the negative outcomes; `None` for a match.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            RecognitionOutcome::NoFaceDetected => Some(ErrorKind::NoFaceDetected),
            RecognitionOutcome::Unrecognized { .. } => Some(ErrorKind::Unrecognized),
            RecognitionOutcome::Matched { .. } => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            RecognitionOutcome::NoFaceDetected => "No face detected. Please face the camera.".into(),
            RecognitionOutcome::Unrecognized { .. } => "Face not recognized.".into(),
            RecognitionOutcome::Matched { display_name, .. } => format!("Welcome, {display_name}!"),
        }
    }
}

pub struct Recognition<'a, M: Matcher = EuclideanMatcher> {
    embedder: &'a dyn FaceEmbedder,
    descriptors: &'a dyn DescriptorStore,
    roster: &'a dyn Roster,
    recorder: AttendanceRecorder<'a>,
    matcher: M,
    config: &'a PipelineConfig,
    abandoned: Option<&'a dyn Fn() -> bool>,
}

impl<'a> Recognition<'a, EuclideanMatcher> {
    pub fn new(
        embedder: &'a dyn FaceEmbedder,
        descriptors: &'a dyn DescriptorStore,
        roster: &'a dyn Roster,
        recorder: AttendanceRecorder<'a>,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            embedder,
            descriptors,
            roster,
            recorder,
            matcher: EuclideanMatcher,
            config,
            abandoned: None,
        }
    }
}

impl<'a, M: Matcher> Recognition<'a, M> {
    pub fn with_matcher<N: Matcher>(self, matcher: N) -> Recognition<'a, N> {
        Recognition {
            embedder: self.embedder,
            descriptors: self.descriptors,
            roster: self.roster,
            recorder: self.recorder,
            matcher,
            config: self.config,
            abandoned: self.abandoned,
        }
    }

    /// Give up before matching, and again before recording attendance, once
    /// `abandoned` returns true. An abandoned attempt reports `NoFaceDetected`
    /// and leaves no attendance behind.
    pub fn abandon_when(mut self, abandoned: &'a dyn Fn() -> bool) -> Self {
        self.abandoned = Some(abandoned);
        self
    }

    fn is_abandoned(&self) -> bool {
        self.abandoned.is_some_and(|abandoned| abandoned())
    }

    pub fn recognize(&self, probe: &CapturedImage, context: CheckInContext) -> RecognitionOutcome {
        self.recognize_at(probe, context, Local::now().naive_local())
    }

    /// As [`recognize`](Self::recognize), recording attendance at `now`.
    pub fn recognize_at(
        &self,
        probe: &CapturedImage,
        context: CheckInContext,
        now: NaiveDateTime,
    ) -> RecognitionOutcome {
        let Some(sample) = self.embedder.detect(&probe.gray) else {
            tracing::info!("recognize: no face detected");
            return RecognitionOutcome::NoFaceDetected;
        };
        if self.is_abandoned() {
            tracing::info!("recognize: caller gone after detection; stopping");
            return RecognitionOutcome::NoFaceDetected;
        }

        let gallery = match self.descriptors.load_all() {
            Ok(gallery) => gallery,
            Err(err) => {
                tracing::error!(error = %err, "descriptor store unreadable; treating probe as unrecognized");
                return RecognitionOutcome::Unrecognized { best_distance: None };
            }
        };

        let deadline = Instant::now() + self.config.scan_budget();
        let result = self.matcher.nearest(
            &sample.embedding,
            &gallery,
            self.config.match_threshold,
            Some(deadline),
        );

        let (person_id, distance) = match (result.matched, result.person_id, result.distance) {
            (true, Some(person_id), Some(distance)) => (person_id, distance),
            _ => {
                tracing::info!(best_distance = ?result.distance, records = gallery.len(), "recognize: stranger");
                return RecognitionOutcome::Unrecognized {
                    best_distance: result.distance,
                };
            }
        };

        let display_name = match self.roster.display_name(&person_id) {
            Ok(Some(name)) => name,
            Ok(None) => person_id.clone(),
            Err(err) => {
                tracing::warn!(person_id = %person_id, error = %err, "roster lookup failed; using student id as name");
                person_id.clone()
            }
        };

        if self.is_abandoned() {
            tracing::info!(person_id = %person_id, "recognize: caller gone before attendance; nothing recorded");
            return RecognitionOutcome::NoFaceDetected;
        }

        let attendance = match self
            .recorder
            .record_at(&person_id, context.subject_id, context.room_id, now)
        {
            Ok(event) => Some(event),
            Err(err) => {
                tracing::error!(
                    person_id = %person_id,
                    subject_id = context.subject_id,
                    room_id = context.room_id,
                    error = %err,
                    "attendance recording failed; recognition result unaffected"
                );
                None
            }
        };

        tracing::info!(person_id = %person_id, distance, "recognize: matched");
        RecognitionOutcome::Matched {
            person_id,
            display_name,
            distance,
            attendance,
        }
    }
}
