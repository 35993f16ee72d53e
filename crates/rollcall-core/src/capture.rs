//! Decoding of kiosk capture payloads.
//!
//! Captures arrive as base64 text, either bare or wrapped in a
//! `data:image/...;base64,` URL. Only JPEG and PNG are accepted; the decoded
//! pixels are reduced to 8-bit luma for the detector.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{DynamicImage, GrayImage, ImageFormat};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("malformed data URL")]
    MalformedDataUrl,
    #[error("unsupported image format: {0} (need JPEG or PNG)")]
    UnsupportedFormat(String),
    #[error("failed to decode image: {0}")]
    Decode(String),
}

/// Container format of a captured image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
}

impl ImageKind {
    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
        }
    }

    /// Map a file extension back to a kind; anything that isn't PNG is served as JPEG.
    pub fn from_extension(ext: &str) -> Self {
        if ext.eq_ignore_ascii_case("png") {
            ImageKind::Png
        } else {
            ImageKind::Jpeg
        }
    }

    fn format(self) -> ImageFormat {
        match self {
            ImageKind::Jpeg => ImageFormat::Jpeg,
            ImageKind::Png => ImageFormat::Png,
        }
    }
}

/// A decoded capture: the original encoded bytes plus the luma plane.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub bytes: Vec<u8>,
    pub kind: ImageKind,
    pub gray: GrayImage,
}

impl CapturedImage {
    /// Decode encoded JPEG/PNG bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, CaptureError> {
        let kind = match image::guess_format(&bytes) {
            Ok(ImageFormat::Jpeg) => ImageKind::Jpeg,
            Ok(ImageFormat::Png) => ImageKind::Png,
            Ok(other) => return Err(CaptureError::UnsupportedFormat(format!("{other:?}"))),
            Err(_) => return Err(CaptureError::UnsupportedFormat("unrecognized".into())),
        };

        let decoded = image::load_from_memory_with_format(&bytes, kind.format())
            .map_err(|e| CaptureError::Decode(e.to_string()))?;

        Ok(Self {
            gray: decoded.to_luma8(),
            bytes,
            kind,
        })
    }

    /// Wrap an in-memory luma image, encoding it as PNG.
    pub fn from_luma(gray: GrayImage) -> Result<Self, CaptureError> {
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(gray.clone())
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| CaptureError::Decode(e.to_string()))?;
        Ok(Self {
            bytes,
            kind: ImageKind::Png,
            gray,
        })
    }
}

/// Decode a base64 capture payload (bare or data URL) into an image.
pub fn decode_capture(payload: &str) -> Result<CapturedImage, CaptureError> {
    let payload = payload.trim();
    let encoded = match payload.strip_prefix("data:") {
        Some(rest) => {
            let (meta, data) = rest.split_once(',').ok_or(CaptureError::MalformedDataUrl)?;
            if !meta.ends_with(";base64") {
                return Err(CaptureError::MalformedDataUrl);
            }
            data
        }
        None => payload,
    };

    let bytes = STANDARD.decode(encoded)?;
    CapturedImage::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn checker(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([if (x + y) % 2 == 0 { 20 } else { 230 }]))
    }

    #[test]
    fn test_decode_bare_base64_png() {
        let png = CapturedImage::from_luma(checker(8, 6)).unwrap();
        let payload = STANDARD.encode(&png.bytes);

        let decoded = decode_capture(&payload).unwrap();
        assert_eq!(decoded.kind, ImageKind::Png);
        assert_eq!(decoded.gray.dimensions(), (8, 6));
        assert_eq!(decoded.gray, png.gray);
    }

    #[test]
    fn test_decode_data_url() {
        let png = CapturedImage::from_luma(checker(4, 4)).unwrap();
        let payload = format!("data:image/png;base64,{}", STANDARD.encode(&png.bytes));

        let decoded = decode_capture(&payload).unwrap();
        assert_eq!(decoded.gray.dimensions(), (4, 4));
    }

    #[test]
    fn test_data_url_without_base64_marker() {
        let err = decode_capture("data:image/png,abcd").unwrap_err();
        assert!(matches!(err, CaptureError::MalformedDataUrl));
    }

    #[test]
    fn test_invalid_base64() {
        let err = decode_capture("@@not base64@@").unwrap_err();
        assert!(matches!(err, CaptureError::Base64(_)));
    }

    #[test]
    fn test_rejects_non_image_bytes() {
        let payload = STANDARD.encode(b"plain text, not a picture");
        let err = decode_capture(&payload).unwrap_err();
        assert!(matches!(err, CaptureError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_kind_metadata() {
        assert_eq!(ImageKind::Png.mime(), "image/png");
        assert_eq!(ImageKind::Jpeg.extension(), "jpg");
        assert_eq!(ImageKind::from_extension("PNG"), ImageKind::Png);
        assert_eq!(ImageKind::from_extension("jpeg"), ImageKind::Jpeg);
    }
}
