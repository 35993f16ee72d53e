//! Nearest-neighbor search over stored descriptors.

use crate::types::{DescriptorRecord, Embedding, MatchResult};
use std::time::Instant;

/// Strategy for comparing a probe embedding against the enrolled gallery.
pub trait Matcher {
    /// Find the nearest stored embedding. Stops and reports no match once
    /// `deadline` passes.
    fn nearest(
        &self,
        probe: &Embedding,
        gallery: &[DescriptorRecord],
        threshold: f32,
        deadline: Option<Instant>,
    ) -> MatchResult;
}

/// Linear scan by Euclidean distance, O(total stored embeddings).
///
/// Only a strictly smaller distance replaces the current best, so among equal
/// distances the first one scanned wins. Embeddings that cannot be compared
/// with the probe (wrong length, non-finite values) are skipped.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn nearest(
        &self,
        probe: &Embedding,
        gallery: &[DescriptorRecord],
        threshold: f32,
        deadline: Option<Instant>,
    ) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;
        let mut skipped = 0usize;

        for (idx, record) in gallery.iter().enumerate() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!(scanned = idx, total = gallery.len(), "descriptor scan over budget; no match");
                return MatchResult::unmatched(best.map(|(_, d)| d));
            }

            for stored in &record.embeddings {
                if !probe.is_comparable_to(stored) {
                    skipped += 1;
                    continue;
                }
                let distance = probe.euclidean_distance(stored);
                if best.map_or(true, |(_, d)| distance < d) {
                    best = Some((idx, distance));
                }
            }
        }

        if skipped > 0 {
            tracing::debug!(skipped, "skipped malformed stored embeddings");
        }

        match best {
            Some((idx, distance)) if distance < threshold => MatchResult {
                matched: true,
                distance: Some(distance),
                person_id: Some(gallery[idx].person_id.clone()),
            },
            _ => MatchResult::unmatched(best.map(|(_, d)| d)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PersonName;
    use std::time::Duration;

    fn record(id: &str, embeddings: Vec<Vec<f32>>) -> DescriptorRecord {
        DescriptorRecord {
            person_id: id.into(),
            name: PersonName::new("First", id),
            embeddings: embeddings.into_iter().map(Embedding::new).collect(),
            created_at: chrono::NaiveDate::from_ymd_opt(2026, 1, 5)
                .unwrap()
                .and_hms_opt(8, 0, 0)
                .unwrap(),
        }
    }

    #[test]
    fn test_empty_gallery_never_matches() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let result = EuclideanMatcher.nearest(&probe, &[], 0.6, None);
        assert!(!result.matched);
        assert_eq!(result.distance, None);
        assert_eq!(result.person_id, None);
    }

    #[test]
    fn test_identical_embedding_matches_owner() {
        let gallery = vec![
            record("S001", vec![vec![1.0, 0.0], vec![0.9, 0.1]]),
            record("S100", vec![vec![0.0, 1.0], vec![0.2, 0.5], vec![0.3, 0.3]]),
        ];
        let probe = Embedding::new(vec![0.2, 0.5]);

        let result = EuclideanMatcher.nearest(&probe, &gallery, 0.6, None);
        assert!(result.matched);
        assert_eq!(result.person_id.as_deref(), Some("S100"));
        assert_eq!(result.distance, Some(0.0));
    }

    #[test]
    fn test_distance_at_threshold_is_unrecognized() {
        let gallery = vec![record("S100", vec![vec![0.6, 0.0]])];
        let probe = Embedding::new(vec![0.0, 0.0]);

        let result = EuclideanMatcher.nearest(&probe, &gallery, 0.6, None);
        assert!(!result.matched);
        assert_eq!(result.person_id, None);
        assert!((result.distance.unwrap() - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_malformed_embeddings_are_skipped() {
        let gallery = vec![
            record("S001", vec![vec![0.0, 0.0, 0.0]]),
            record("S002", vec![vec![f32::NAN, 0.0]]),
            record("S003", vec![vec![0.1, 0.0]]),
        ];
        let probe = Embedding::new(vec![0.0, 0.0]);

        let result = EuclideanMatcher.nearest(&probe, &gallery, 0.6, None);
        assert!(result.matched);
        assert_eq!(result.person_id.as_deref(), Some("S003"));
    }

    #[test]
    fn test_tie_goes_to_first_scanned() {
        let gallery = vec![
            record("S001", vec![vec![0.3, 0.0]]),
            record("S002", vec![vec![-0.3, 0.0]]),
        ];
        let probe = Embedding::new(vec![0.0, 0.0]);

        let result = EuclideanMatcher.nearest(&probe, &gallery, 0.6, None);
        assert_eq!(result.person_id.as_deref(), Some("S001"));
    }

    #[test]
    fn test_expired_deadline_fails_closed() {
        let gallery = vec![record("S100", vec![vec![0.0, 0.0]])];
        let probe = Embedding::new(vec![0.0, 0.0]);
        let past = Instant::now() - Duration::from_millis(1);

        let result = EuclideanMatcher.nearest(&probe, &gallery, 0.6, Some(past));
        assert!(!result.matched);
    }
}
