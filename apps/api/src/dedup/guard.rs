//! Near-duplicate rejection for freshly generated artifacts.
//!
//! A candidate is compared against every existing variant under the same
//! cache key; landing within the configured Hamming distance of any of them
//! rejects the candidate and signals the coordinator to regenerate with a
//! fresh seed. Unrelated cache keys are never compared.

use uuid::Uuid;

use crate::dedup::phash::hamming_distance;
use crate::models::media::VariantRow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupVerdict {
    Accept,
    NearDuplicate { variant_id: Uuid, distance: u32 },
}

/// Checks a candidate phash against the variants already under the key.
/// Rejects when the minimum distance falls below `reject_distance`.
pub fn check(candidate_phash: i64, existing: &[VariantRow], reject_distance: u32) -> DedupVerdict {
    let closest = existing
        .iter()
        .map(|v| (hamming_distance(candidate_phash, v.phash), v.variant_id))
        .min_by_key(|(distance, _)| *distance);

    match closest {
        Some((distance, variant_id)) if distance < reject_distance => {
            DedupVerdict::NearDuplicate {
                variant_id,
                distance,
            }
        }
        _ => DedupVerdict::Accept,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn variant(phash: i64) -> VariantRow {
        VariantRow {
            variant_id: Uuid::new_v4(),
            pk_id: "nova:k".to_string(),
            soul_id: "nova".to_string(),
            asset_url: "/assets/x.png".to_string(),
            storage_key: "soul/nova/key/k/variant/x.png".to_string(),
            seed: 1,
            phash,
            meta: json!({}),
            updated_at_ts: 0,
        }
    }

    #[test]
    fn test_empty_catalog_accepts() {
        assert_eq!(check(0x00ff, &[], 5), DedupVerdict::Accept);
    }

    #[test]
    fn test_identical_hash_rejects() {
        let existing = vec![variant(0x00ff)];
        let verdict = check(0x00ff, &existing, 5);
        assert!(matches!(
            verdict,
            DedupVerdict::NearDuplicate { distance: 0, .. }
        ));
    }

    #[test]
    fn test_close_hash_rejects_and_names_the_neighbor() {
        let near = variant(0b0111); // distance 1 from 0b0011
        let existing = vec![variant(i64::MIN), near.clone()];
        match check(0b0011, &existing, 5) {
            DedupVerdict::NearDuplicate {
                variant_id,
                distance,
            } => {
                assert_eq!(variant_id, near.variant_id);
                assert_eq!(distance, 1);
            }
            DedupVerdict::Accept => panic!("expected rejection"),
        }
    }

    #[test]
    fn test_distance_at_threshold_accepts() {
        // Five flipped bits, threshold five: not "below", so accepted.
        let existing = vec![variant(0b11111)];
        assert_eq!(check(0, &existing, 5), DedupVerdict::Accept);
    }

    #[test]
    fn test_far_hash_accepts() {
        let existing = vec![variant(0)];
        assert_eq!(check(-1, &existing, 5), DedupVerdict::Accept);
    }
}
