//! In-memory collaborators and a deterministic embedder for workflow tests.

use crate::capture::CapturedImage;
use crate::embedder::FaceEmbedder;
use crate::ports::{
    AttendanceSink, DescriptorStore, FaceImageStore, Roster, SectionResolver, StoreError,
};
use crate::types::{
    AttendanceEvent, BoundingBox, DescriptorRecord, Embedding, FaceSample, Landmarks, RoomId,
    SectionId, SubjectId,
};
use chrono::{NaiveDate, NaiveDateTime};
use image::{GrayImage, Luma};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

/// A uniform 8×8 capture; its pixel value selects the fake face.
pub fn capture(value: u8) -> CapturedImage {
    CapturedImage::from_luma(GrayImage::from_pixel(8, 8, Luma([value]))).unwrap()
}

const FRONT_LANDMARKS: Landmarks = [(3.0, 3.0), (5.0, 3.0), (4.0, 4.0), (3.0, 6.0), (5.0, 6.0)];

/// Returns a fixed embedding per capture pixel value; unknown values have no face.
#[derive(Default)]
pub struct FakeEmbedder {
    faces: HashMap<u8, Vec<f32>>,
    pub calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn with_face(mut self, pixel: u8, values: Vec<f32>) -> Self {
        self.faces.insert(pixel, values);
        self
    }
}

impl FaceEmbedder for FakeEmbedder {
    fn detect(&self, image: &GrayImage) -> Option<FaceSample> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = image.get_pixel(0, 0).0[0];
        let values = self.faces.get(&key)?;
        Some(FaceSample {
            embedding: Embedding::new(values.clone()),
            face: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 8.0,
                height: 8.0,
                confidence: 0.99,
                landmarks: Some(FRONT_LANDMARKS),
            },
        })
    }
}

/// Everything the workflows persist, kept in maps.
#[derive(Default)]
pub struct MemoryStore {
    students: Mutex<BTreeMap<String, String>>,
    descriptors: Mutex<BTreeMap<String, DescriptorRecord>>,
    images: Mutex<BTreeMap<(String, usize), Vec<u8>>>,
    schedules: Mutex<HashMap<(RoomId, SubjectId), SectionId>>,
    attendance: Mutex<Vec<AttendanceEvent>>,
    fail_images: AtomicBool,
    fail_attendance: AtomicBool,
    fail_roster: AtomicBool,
}

impl MemoryStore {
    pub fn add_student(&self, id: &str, name: &str) {
        self.students.lock().unwrap().insert(id.into(), name.into());
    }

    pub fn schedule(&self, room_id: RoomId, subject_id: SubjectId, section_id: SectionId) {
        self.schedules.lock().unwrap().insert((room_id, subject_id), section_id);
    }

    pub fn fail_images(&self) {
        self.fail_images.store(true, Ordering::SeqCst);
    }

    pub fn fail_attendance(&self) {
        self.fail_attendance.store(true, Ordering::SeqCst);
    }

    pub fn fail_roster(&self) {
        self.fail_roster.store(true, Ordering::SeqCst);
    }

    pub fn descriptor(&self, id: &str) -> Option<DescriptorRecord> {
        self.descriptors.lock().unwrap().get(id).cloned()
    }

    pub fn descriptor_count(&self) -> usize {
        self.descriptors.lock().unwrap().len()
    }

    pub fn insert_descriptor(&self, record: DescriptorRecord) {
        self.descriptors.lock().unwrap().insert(record.person_id.clone(), record);
    }

    pub fn image_slots(&self, id: &str) -> Vec<usize> {
        self.images
            .lock()
            .unwrap()
            .keys()
            .filter(|(owner, _)| owner == id)
            .map(|(_, slot)| *slot)
            .collect()
    }

    pub fn attendance(&self) -> Vec<AttendanceEvent> {
        self.attendance.lock().unwrap().clone()
    }

    fn injected(what: &str) -> StoreError {
        StoreError::Corrupt(format!("injected {what} failure"))
    }
}

impl Roster for MemoryStore {
    fn exists(&self, person_id: &str) -> Result<bool, StoreError> {
        Ok(self.students.lock().unwrap().contains_key(person_id))
    }

    fn display_name(&self, person_id: &str) -> Result<Option<String>, StoreError> {
        if self.fail_roster.load(Ordering::SeqCst) {
            return Err(Self::injected("roster"));
        }
        Ok(self.students.lock().unwrap().get(person_id).cloned())
    }
}

impl DescriptorStore for MemoryStore {
    fn create_if_absent(&self, record: &DescriptorRecord) -> Result<bool, StoreError> {
        let mut descriptors = self.descriptors.lock().unwrap();
        if descriptors.contains_key(&record.person_id) {
            return Ok(false);
        }
        descriptors.insert(record.person_id.clone(), record.clone());
        Ok(true)
    }

    fn exists(&self, person_id: &str) -> Result<bool, StoreError> {
        Ok(self.descriptors.lock().unwrap().contains_key(person_id))
    }

    fn load_all(&self) -> Result<Vec<DescriptorRecord>, StoreError> {
        Ok(self.descriptors.lock().unwrap().values().cloned().collect())
    }

    fn remove(&self, person_id: &str) -> Result<bool, StoreError> {
        Ok(self.descriptors.lock().unwrap().remove(person_id).is_some())
    }
}

impl FaceImageStore for MemoryStore {
    fn save(&self, person_id: &str, slot: usize, image: &CapturedImage) -> Result<(), StoreError> {
        // Fail on the second slot so that a partial write has to be undone.
        if self.fail_images.load(Ordering::SeqCst) && slot > 0 {
            return Err(Self::injected("image"));
        }
        self.images
            .lock()
            .unwrap()
            .insert((person_id.to_string(), slot), image.bytes.clone());
        Ok(())
    }

    fn remove_all(&self, person_id: &str) -> Result<usize, StoreError> {
        let mut images = self.images.lock().unwrap();
        let before = images.len();
        images.retain(|(owner, _), _| owner != person_id);
        Ok(before - images.len())
    }
}

impl SectionResolver for MemoryStore {
    fn section_for(&self, room_id: RoomId, subject_id: SubjectId) -> Result<Option<SectionId>, StoreError> {
        Ok(self.schedules.lock().unwrap().get(&(room_id, subject_id)).copied())
    }
}

impl AttendanceSink for MemoryStore {
    fn upsert(&self, event: &AttendanceEvent) -> Result<(), StoreError> {
        if self.fail_attendance.load(Ordering::SeqCst) {
            return Err(Self::injected("attendance"));
        }
        let mut rows = self.attendance.lock().unwrap();
        let same_key = |row: &AttendanceEvent| {
            row.person_id == event.person_id
                && row.subject_id == event.subject_id
                && row.section_id == event.section_id
                && row.date == event.date
        };
        match rows.iter_mut().find(|row| same_key(row)) {
            Some(row) => *row = event.clone(),
            None => rows.push(event.clone()),
        }
        Ok(())
    }
}
