//! The face detector/embedder seam used by every workflow.
//!
//! `detect` is a pure function of the image: at most one face (the highest
//! confidence one) comes back, and any internal failure is reported as "no
//! face" rather than an error.

use crate::config::PipelineConfig;
use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::FaceSample;
use image::GrayImage;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use thiserror::Error;

pub const DETECTOR_MODEL: &str = "det_10g.onnx";
pub const EMBEDDER_MODEL: &str = "mobilefacenet.onnx";

pub trait FaceEmbedder: Send + Sync {
    /// Locate the most confident face and embed it; `None` when nothing clears
    /// the detection threshold or the models are unusable.
    fn detect(&self, image: &GrayImage) -> Option<FaceSample>;
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

struct Models {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

/// ONNX-backed embedder. Models load on first use behind a `OnceLock`, so
/// concurrent first calls wait for a single load instead of racing.
pub struct OnnxEmbedder {
    detector_path: PathBuf,
    recognizer_path: PathBuf,
    min_confidence: f32,
    dim: usize,
    models: OnceLock<Option<Mutex<Models>>>,
}

impl OnnxEmbedder {
    pub fn new(model_dir: &Path, config: &PipelineConfig) -> Self {
        Self {
            detector_path: model_dir.join(DETECTOR_MODEL),
            recognizer_path: model_dir.join(EMBEDDER_MODEL),
            min_confidence: config.detection_confidence,
            dim: config.embedding_dim,
            models: OnceLock::new(),
        }
    }

    /// Force the model load now. Returns whether the models are usable.
    pub fn warm_up(&self) -> bool {
        self.models().is_some()
    }

    fn models(&self) -> Option<&Mutex<Models>> {
        self.models
            .get_or_init(|| match self.load() {
                Ok(models) => Some(Mutex::new(models)),
                Err(err) => {
                    // Cached: every later detect reports "no face" until restart.
                    tracing::error!(error = %err, "face models failed to load");
                    None
                }
            })
            .as_ref()
    }

    fn load(&self) -> Result<Models, ModelError> {
        let detector = FaceDetector::load(&self.detector_path, self.min_confidence)?;
        let recognizer = FaceRecognizer::load(&self.recognizer_path, self.dim)?;
        Ok(Models { detector, recognizer })
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn detect(&self, image: &GrayImage) -> Option<FaceSample> {
        let models = self.models()?;
        let mut models = models.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let faces = match models.detector.detect(image) {
            Ok(faces) => faces,
            Err(err) => {
                tracing::warn!(error = %err, "face detection failed; treating as no face");
                return None;
            }
        };
        let face = faces.into_iter().next()?;

        match models.recognizer.extract(image, &face) {
            Ok(embedding) => Some(FaceSample { embedding, face }),
            Err(err) => {
                tracing::warn!(error = %err, "embedding extraction failed; treating as no face");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_missing_models_fail_closed() {
        let embedder = OnnxEmbedder::new(Path::new("/nonexistent/models"), &PipelineConfig::default());
        assert!(!embedder.warm_up());

        let image = GrayImage::from_pixel(32, 32, Luma([128]));
        assert!(embedder.detect(&image).is_none());
    }

    #[test]
    fn test_concurrent_first_calls_share_one_load() {
        let embedder = OnnxEmbedder::new(Path::new("/nonexistent/models"), &PipelineConfig::default());
        let image = GrayImage::from_pixel(16, 16, Luma([0]));

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| assert!(embedder.detect(&image).is_none()));
            }
        });
        assert!(embedder.models.get().is_some());
    }
}
