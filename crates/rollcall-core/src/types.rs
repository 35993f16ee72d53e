use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Roster identifier of a student (e.g. "S100").
pub type PersonId = String;
pub type SubjectId = i64;
pub type SectionId = i64;
pub type RoomId = i64;
/// Identifier of whoever recorded an attendance mark.
pub type RecorderId = i64;

/// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type Landmarks = [(f32, f32); 5];

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub landmarks: Option<Landmarks>,
}

impl BoundingBox {
    /// Intersection-over-union with another box, 0.0 for degenerate boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);

        let overlap = (right - left).max(0.0) * (bottom - top).max(0.0);
        let union = self.width * self.height + other.width * other.height - overlap;
        if union > 0.0 {
            overlap / union
        } else {
            0.0
        }
    }
}

/// Face embedding vector produced by the embedding network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding (e.g., "mobilefacenet").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Euclidean distance between two embeddings of equal length.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// True when `other` can be compared against `self`: same length, all values finite.
    pub fn is_comparable_to(&self, other: &Embedding) -> bool {
        other.values.len() == self.values.len() && other.values.iter().all(|v| v.is_finite())
    }
}

/// A single detected face together with its embedding.
#[derive(Debug, Clone)]
pub struct FaceSample {
    pub embedding: Embedding,
    pub face: BoundingBox,
}

/// Name parts carried on a descriptor record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonName {
    pub first: String,
    #[serde(default)]
    pub middle: Option<String>,
    pub last: String,
}

impl PersonName {
    pub fn new(first: impl Into<String>, last: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            middle: None,
            last: last.into(),
        }
    }
}

impl fmt::Display for PersonName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.middle.as_deref().filter(|m| !m.is_empty()) {
            Some(middle) => write!(f, "{} {} {}", self.first, middle, self.last),
            None => write!(f, "{} {}", self.first, self.last),
        }
    }
}

/// The persisted set of embeddings for one enrolled person.
///
/// At most one record exists per `person_id`; records are never mutated
/// after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorRecord {
    pub person_id: PersonId,
    pub name: PersonName,
    pub embeddings: Vec<Embedding>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    /// Canonical stored form ("Present", "Absent", ...).
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
            AttendanceStatus::Late => "Late",
            AttendanceStatus::Excused => "Excused",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown attendance status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for AttendanceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            "excused" => Ok(AttendanceStatus::Excused),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// One attendance mark. Unique per (person_id, subject_id, section_id, date);
/// a later write for the same key replaces status, recorder and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub person_id: PersonId,
    pub subject_id: SubjectId,
    pub section_id: SectionId,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub recorded_by: RecorderId,
    pub recorded_at: NaiveDateTime,
}

/// Result of matching a probe embedding against the descriptor gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Smallest distance seen during the scan, if any embedding was compared.
    pub distance: Option<f32>,
    /// Owner of the nearest embedding when `matched`.
    pub person_id: Option<PersonId>,
}

impl MatchResult {
    pub fn unmatched(distance: Option<f32>) -> Self {
        Self {
            matched: false,
            distance,
            person_id: None,
        }
    }
}
