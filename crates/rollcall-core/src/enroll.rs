//! Face registration for roster students.

use crate::capture::CapturedImage;
use crate::config::PipelineConfig;
use crate::embedder::FaceEmbedder;
use crate::error::PipelineError;
use crate::ports::{DescriptorStore, FaceImageStore, Roster, StoreError};
use crate::types::{DescriptorRecord, PersonId, PersonName};
use chrono::Local;

pub struct EnrollRequest {
    pub person_id: PersonId,
    pub name: PersonName,
    /// Front, left and right captures, in that order.
    pub images: Vec<CapturedImage>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct EnrollOutcome {
    pub person_id: PersonId,
    pub embeddings: usize,
}

pub struct Enrollment<'a> {
    embedder: &'a dyn FaceEmbedder,
    roster: &'a dyn Roster,
    descriptors: &'a dyn DescriptorStore,
    images: &'a dyn FaceImageStore,
    config: &'a PipelineConfig,
}

impl<'a> Enrollment<'a> {
    pub fn new(
        embedder: &'a dyn FaceEmbedder,
        roster: &'a dyn Roster,
        descriptors: &'a dyn DescriptorStore,
        images: &'a dyn FaceImageStore,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            embedder,
            roster,
            descriptors,
            images,
            config,
        }
    }

    /// Register a student's face.
    ///
    /// Either one descriptor record holding one embedding per image is created
    /// together with every reference image, or nothing is persisted.
    pub fn enroll(&self, request: EnrollRequest) -> Result<EnrollOutcome, PipelineError> {
        let EnrollRequest {
            person_id,
            name,
            images,
        } = request;

        if !self.roster.exists(&person_id)? {
            return Err(PipelineError::InvalidIdentity(person_id));
        }
        // Fast answer only; create_if_absent below is the authoritative guard.
        if self.descriptors.exists(&person_id)? {
            return Err(PipelineError::AlreadyEnrolled(person_id));
        }
        if images.len() != self.config.enroll_images {
            return Err(PipelineError::WrongImageCount {
                expected: self.config.enroll_images,
                actual: images.len(),
            });
        }

        let mut embeddings = Vec::with_capacity(images.len());
        for (image_index, image) in images.iter().enumerate() {
            let sample = self
                .embedder
                .detect(&image.gray)
                .ok_or(PipelineError::NoFaceDetected { image_index })?;
            tracing::debug!(person_id = %person_id, image_index, confidence = sample.face.confidence, "enroll: face embedded");
            embeddings.push(sample.embedding);
        }

        let record = DescriptorRecord {
            person_id: person_id.clone(),
            name,
            embeddings,
            created_at: Local::now().naive_local(),
        };
        if !self.descriptors.create_if_absent(&record)? {
            return Err(PipelineError::AlreadyEnrolled(person_id));
        }

        if let Err(err) = self.store_images(&person_id, &images) {
            self.roll_back(&person_id);
            return Err(err.into());
        }

        tracing::info!(person_id = %person_id, embeddings = record.embeddings.len(), "face registered");
        Ok(EnrollOutcome {
            person_id,
            embeddings: record.embeddings.len(),
        })
    }

    fn store_images(&self, person_id: &str, images: &[CapturedImage]) -> Result<(), StoreError> {
        for (slot, image) in images.iter().enumerate() {
            self.images.save(person_id, slot, image)?;
        }
        Ok(())
    }

    fn roll_back(&self, person_id: &str) {
        if let Err(err) = self.images.remove_all(person_id) {
            tracing::error!(person_id, error = %err, "failed to remove partial face images");
        }
        if let Err(err) = self.descriptors.remove(person_id) {
            tracing::error!(person_id, error = %err, "failed to remove descriptor after image failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{capture, FakeEmbedder, MemoryStore};
    use crate::types::Embedding;

    fn embedder() -> FakeEmbedder {
        FakeEmbedder::default()
            .with_face(10, vec![0.1, 0.0, 0.0])
            .with_face(20, vec![0.0, 0.2, 0.0])
            .with_face(30, vec![0.0, 0.0, 0.3])
    }

    fn request(id: &str, pixels: &[u8]) -> EnrollRequest {
        EnrollRequest {
            person_id: id.into(),
            name: PersonName::new("Ana", "Reyes"),
            images: pixels.iter().map(|&p| capture(p)).collect(),
        }
    }

    #[test]
    fn test_valid_enrollment_stores_one_record_with_three_embeddings() {
        let store = MemoryStore::default();
        store.add_student("S100", "Ana Reyes");
        let embedder = embedder();
        let config = PipelineConfig::default();
        let enrollment = Enrollment::new(&embedder, &store, &store, &store, &config);

        let outcome = enrollment.enroll(request("S100", &[10, 20, 30])).unwrap();
        assert_eq!(outcome.embeddings, 3);

        assert_eq!(store.descriptor_count(), 1);
        let record = store.descriptor("S100").unwrap();
        assert_eq!(record.embeddings.len(), 3);
        assert_eq!(record.embeddings[1], Embedding::new(vec![0.0, 0.2, 0.0]));
        assert_eq!(store.image_slots("S100"), vec![0, 1, 2]);
    }

    #[test]
    fn test_unknown_student_is_invalid_identity_before_any_detection() {
        let store = MemoryStore::default();
        let embedder = embedder();
        let config = PipelineConfig::default();
        let enrollment = Enrollment::new(&embedder, &store, &store, &store, &config);

        let err = enrollment.enroll(request("S999", &[10, 20, 30])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidIdentity);

        // Even with unusable images the identity check wins.
        let err = enrollment.enroll(request("S999", &[0])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidIdentity);
        assert_eq!(embedder.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(store.descriptor_count(), 0);
    }

    #[test]
    fn test_already_enrolled_leaves_record_untouched() {
        let store = MemoryStore::default();
        store.add_student("S100", "Ana Reyes");
        let embedder = embedder();
        let config = PipelineConfig::default();
        let enrollment = Enrollment::new(&embedder, &store, &store, &store, &config);

        enrollment.enroll(request("S100", &[10, 20, 30])).unwrap();
        let before = store.descriptor("S100").unwrap();

        let err = enrollment.enroll(request("S100", &[30, 20, 10])).unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyEnrolled(ref id) if id == "S100"));

        let after = store.descriptor("S100").unwrap();
        assert_eq!(before.embeddings, after.embeddings);
        assert_eq!(before.created_at, after.created_at);
    }

    #[test]
    fn test_no_face_in_any_image_aborts_without_writes() {
        let store = MemoryStore::default();
        store.add_student("S100", "Ana Reyes");
        let embedder = embedder();
        let config = PipelineConfig::default();
        let enrollment = Enrollment::new(&embedder, &store, &store, &store, &config);

        let err = enrollment.enroll(request("S100", &[10, 99, 30])).unwrap_err();
        assert!(matches!(err, PipelineError::NoFaceDetected { image_index: 1 }));
        assert_eq!(store.descriptor_count(), 0);
        assert!(store.image_slots("S100").is_empty());
    }

    #[test]
    fn test_wrong_image_count() {
        let store = MemoryStore::default();
        store.add_student("S100", "Ana Reyes");
        let embedder = embedder();
        let config = PipelineConfig::default();
        let enrollment = Enrollment::new(&embedder, &store, &store, &store, &config);

        let err = enrollment.enroll(request("S100", &[10, 20])).unwrap_err();
        assert!(matches!(err, PipelineError::WrongImageCount { expected: 3, actual: 2 }));
    }

    #[test]
    fn test_image_failure_rolls_back_descriptor() {
        let store = MemoryStore::default();
        store.add_student("S100", "Ana Reyes");
        store.fail_images();
        let embedder = embedder();
        let config = PipelineConfig::default();
        let enrollment = Enrollment::new(&embedder, &store, &store, &store, &config);

        let err = enrollment.enroll(request("S100", &[10, 20, 30])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert_eq!(store.descriptor_count(), 0);
        assert!(store.image_slots("S100").is_empty());
    }

    #[test]
    fn test_lost_create_race_reports_already_enrolled() {
        // Simulates a concurrent enrollment landing between the existence
        // check and the insert.
        struct RacingStore(MemoryStore);
        impl DescriptorStore for RacingStore {
            fn create_if_absent(&self, _record: &DescriptorRecord) -> Result<bool, StoreError> {
                Ok(false)
            }
            fn exists(&self, _person_id: &str) -> Result<bool, StoreError> {
                Ok(false)
            }
            fn load_all(&self) -> Result<Vec<DescriptorRecord>, StoreError> {
                self.0.load_all()
            }
            fn remove(&self, person_id: &str) -> Result<bool, StoreError> {
                self.0.remove(person_id)
            }
        }

        let store = MemoryStore::default();
        store.add_student("S100", "Ana Reyes");
        let racing = RacingStore(MemoryStore::default());
        let embedder = embedder();
        let config = PipelineConfig::default();
        let enrollment = Enrollment::new(&embedder, &store, &racing, &store, &config);

        let err = enrollment.enroll(request("S100", &[10, 20, 30])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyEnrolled);
        assert!(store.image_slots("S100").is_empty());
    }
}
