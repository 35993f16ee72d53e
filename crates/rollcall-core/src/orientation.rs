//! Coarse head orientation from landmark geometry.
//!
//! Heuristic only: the nose tip's horizontal offset from the midpoint of the
//! eyes decides between front, left and right.

use crate::embedder::FaceEmbedder;
use crate::types::Landmarks;
use image::GrayImage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Front,
    Left,
    Right,
}

/// Classify landmarks. Offsets strictly beyond `±max_offset` count as turned.
pub fn classify(landmarks: &Landmarks, max_offset: f32) -> Orientation {
    let [left_eye, right_eye, nose, _, _] = *landmarks;
    let eye_mid_x = (left_eye.0 + right_eye.0) / 2.0;
    let offset = nose.0 - eye_mid_x;

    if offset > max_offset {
        Orientation::Left
    } else if offset < -max_offset {
        Orientation::Right
    } else {
        Orientation::Front
    }
}

/// Detect a face and classify its orientation; `None` when no usable face is found.
pub fn check_orientation(embedder: &dyn FaceEmbedder, image: &GrayImage, max_offset: f32) -> Option<Orientation> {
    let sample = embedder.detect(image)?;
    let landmarks = sample.face.landmarks?;
    Some(classify(&landmarks, max_offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_with_nose_at(nose_x: f32) -> Landmarks {
        [(100.0, 80.0), (140.0, 80.0), (nose_x, 110.0), (105.0, 140.0), (135.0, 140.0)]
    }

    #[test]
    fn test_centered_nose_is_front() {
        assert_eq!(classify(&face_with_nose_at(120.0), 15.0), Orientation::Front);
    }

    #[test]
    fn test_large_positive_offset_is_left() {
        assert_eq!(classify(&face_with_nose_at(136.0), 15.0), Orientation::Left);
    }

    #[test]
    fn test_large_negative_offset_is_right() {
        assert_eq!(classify(&face_with_nose_at(104.0), 15.0), Orientation::Right);
    }

    #[test]
    fn test_offset_exactly_at_limit_is_front() {
        assert_eq!(classify(&face_with_nose_at(135.0), 15.0), Orientation::Front);
        assert_eq!(classify(&face_with_nose_at(105.0), 15.0), Orientation::Front);
    }

    #[test]
    fn test_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Orientation::Left).unwrap(), "\"left\"");
    }
}
