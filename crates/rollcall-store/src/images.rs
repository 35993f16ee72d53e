//! Reference face images on the filesystem, named `<person_id>_<slot>.<ext>`.

use crate::error::{DbError, Result};
use rollcall_core::{CapturedImage, FaceImageStore, ImageKind, StoreError};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub struct FsImageStore {
    root: PathBuf,
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

impl FsImageStore {
    /// Use `root` as the image directory, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file_name(person_id: &str, slot: usize, kind: ImageKind) -> String {
        format!("{person_id}_{slot}.{}", kind.extension())
    }

    /// Read a stored image by file name, returning its bytes and MIME type.
    /// Names that could escape the image directory are rejected.
    pub fn read(&self, filename: &str) -> Result<(Vec<u8>, &'static str)> {
        if !is_safe_name(filename) {
            return Err(DbError::InvalidInput(format!("invalid image name {filename:?}")));
        }
        let path = self.root.join(filename);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(DbError::NotFound(filename.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        Ok((bytes, ImageKind::from_extension(ext).mime()))
    }

    /// File names of every image stored for `person_id`, by slot.
    pub fn list(&self, person_id: &str) -> Result<Vec<String>> {
        let prefix = format!("{person_id}_");
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            let Some((slot, _ext)) = rest.split_once('.') else {
                continue;
            };
            if let Ok(slot) = slot.parse::<usize>() {
                found.push((slot, name));
            }
        }
        found.sort();
        Ok(found.into_iter().map(|(_, name)| name).collect())
    }
}

impl FaceImageStore for FsImageStore {
    fn save(&self, person_id: &str, slot: usize, image: &CapturedImage) -> std::result::Result<(), StoreError> {
        if !is_safe_name(person_id) {
            return Err(DbError::InvalidInput(format!("invalid person id {person_id:?}")).into());
        }
        let path = self.root.join(Self::file_name(person_id, slot, image.kind));
        fs::write(&path, &image.bytes)?;
        tracing::debug!(path = %path.display(), "face image saved");
        Ok(())
    }

    fn remove_all(&self, person_id: &str) -> std::result::Result<usize, StoreError> {
        let mut removed = 0;
        for name in self.list(person_id)? {
            match fs::remove_file(self.root.join(&name)) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn capture() -> CapturedImage {
        CapturedImage::from_luma(GrayImage::from_pixel(4, 4, Luma([128]))).unwrap()
    }

    #[test]
    fn test_save_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsImageStore::open(dir.path().join("faces")).unwrap();

        for slot in 0..3 {
            store.save("S1", slot, &capture()).unwrap();
        }
        store.save("S10", 0, &capture()).unwrap();

        assert_eq!(store.list("S1").unwrap(), vec!["S1_0.png", "S1_1.png", "S1_2.png"]);

        let (bytes, mime) = store.read("S1_1.png").unwrap();
        assert_eq!(bytes, capture().bytes);
        assert_eq!(mime, "image/png");

        assert_eq!(store.remove_all("S1").unwrap(), 3);
        assert_eq!(store.list("S10").unwrap(), vec!["S10_0.png"]);
        assert!(matches!(store.read("S1_0.png"), Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_traversal_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsImageStore::open(dir.path()).unwrap();

        for name in ["../secret.jpg", "a/b.jpg", "..", "a\\b.png", ""] {
            assert!(matches!(store.read(name), Err(DbError::InvalidInput(_))), "{name}");
        }
        assert!(store.save("../S1", 0, &capture()).is_err());
    }
}
