//! Face alignment via a 4-DOF similarity transform.
//!
//! Maps the five detected landmarks onto the canonical 112×112 template used
//! by the embedding network, then resamples the capture into that frame.

use crate::types::Landmarks;
use image::{GrayImage, Luma};

/// Canonical landmark positions for a 112×112 aligned crop.
const TEMPLATE_112: Landmarks = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Similarity transform `dst = [a -b; b a] * src + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Closed-form least-squares fit from `src` to `dst`.
    ///
    /// Centers both point sets, solves for the rotation/scale pair on the
    /// centered coordinates, then recovers the translation from the means.
    fn fit(src: &Landmarks, dst: &Landmarks) -> Self {
        let n = src.len() as f32;
        let mean = |pts: &Landmarks| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (smx, smy) = mean(src);
        let (dmx, dmy) = mean(dst);

        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        let mut spread = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (x, y) = (sx - smx, sy - smy);
            let (u, v) = (dx - dmx, dy - dmy);
            dot += x * u + y * v;
            cross += x * v - y * u;
            spread += x * x + y * y;
        }

        if spread < 1e-12 {
            // Degenerate landmarks: translate the source centroid onto the template.
            return Self { a: 1.0, b: 0.0, tx: dmx - smx, ty: dmy - smy };
        }

        let a = dot / spread;
        let b = cross / spread;
        Self {
            a,
            b,
            tx: dmx - (a * smx - b * smy),
            ty: dmy - (b * smx + a * smy),
        }
    }

    #[cfg(test)]
    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (self.a * x - self.b * y + self.tx, self.b * x + self.a * y + self.ty)
    }

    /// Map a destination point back into source coordinates.
    fn invert(&self, (u, v): (f32, f32)) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (du, dv) = (u - self.tx, v - self.ty);
        Some(((self.a * du + self.b * dv) / det, (self.a * dv - self.b * du) / det))
    }
}

/// Bilinear sample with black outside the image.
fn sample(image: &GrayImage, x: f32, y: f32) -> u8 {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let at = |px: i64, py: i64| -> f32 {
        if px >= 0 && py >= 0 && px < w && py < h {
            image.get_pixel(px as u32, py as u32).0[0] as f32
        } else {
            0.0
        }
    };

    let top = at(x0, y0) * (1.0 - fx) + at(x0 + 1, y0) * fx;
    let bottom = at(x0, y0 + 1) * (1.0 - fx) + at(x0 + 1, y0 + 1) * fx;
    (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
}

/// Align a detected face into a canonical 112×112 crop.
pub fn align_face(image: &GrayImage, landmarks: &Landmarks) -> GrayImage {
    let transform = Similarity::fit(landmarks, &TEMPLATE_112);
    GrayImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |ox, oy| {
        match transform.invert((ox as f32, oy as f32)) {
            Some((sx, sy)) => Luma([sample(image, sx, sy)]),
            None => Luma([0]),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_fit() {
        let t = Similarity::fit(&TEMPLATE_112, &TEMPLATE_112);
        assert!((t.a - 1.0).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4, "b = {}", t.b);
        assert!(t.tx.abs() < 1e-3 && t.ty.abs() < 1e-3);
    }

    #[test]
    fn test_half_scale_fit() {
        let doubled = TEMPLATE_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let t = Similarity::fit(&doubled, &TEMPLATE_112);
        assert!((t.a - 0.5).abs() < 1e-3, "a = {}", t.a);
        assert!(t.b.abs() < 1e-3);
    }

    #[test]
    fn test_rotation_fit_recovers_points() {
        // Rotate the template 90° about the origin and shift it.
        let rotated = TEMPLATE_112.map(|(x, y)| (-y + 300.0, x + 40.0));
        let t = Similarity::fit(&rotated, &TEMPLATE_112);
        for (src, dst) in rotated.iter().zip(TEMPLATE_112.iter()) {
            let (x, y) = t.apply(*src);
            assert!((x - dst.0).abs() < 1e-2 && (y - dst.1).abs() < 1e-2);
        }
    }

    #[test]
    fn test_invert_roundtrip() {
        let t = Similarity { a: 0.8, b: 0.3, tx: 12.0, ty: -4.0 };
        let p = (57.0, 81.0);
        let back = t.invert(t.apply(p)).unwrap();
        assert!((back.0 - p.0).abs() < 1e-3 && (back.1 - p.1).abs() < 1e-3);
    }

    #[test]
    fn test_degenerate_landmarks_do_not_panic() {
        let collapsed = [(50.0, 50.0); 5];
        let image = GrayImage::from_pixel(100, 100, Luma([128]));
        let aligned = align_face(&image, &collapsed);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
    }

    #[test]
    fn test_bright_patch_lands_on_template_eye() {
        let landmarks: Landmarks = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        let mut image = GrayImage::new(200, 200);
        for y in 58..=62 {
            for x in 78..=82 {
                image.put_pixel(x, y, Luma([255]));
            }
        }

        let aligned = align_face(&image, &landmarks);

        let (ex, ey) = (TEMPLATE_112[0].0.round() as u32, TEMPLATE_112[0].1.round() as u32);
        let brightest = (ey - 1..=ey + 1)
            .flat_map(|y| (ex - 1..=ex + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned.get_pixel(x, y).0[0])
            .max()
            .unwrap();
        assert!(brightest > 100, "expected bright patch near template eye, max={brightest}");
    }
}
