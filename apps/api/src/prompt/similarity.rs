//! Cue-to-cache-key resolution.
//!
//! Resolution is an approximate equivalence: two cues land in the same bucket
//! when their embeddings clear the configured cosine threshold against at
//! least one existing key. False merges and false splits are accepted
//! tradeoffs bounded by the threshold. The content hash serves as a fast
//! exact pre-check before any embedding scan.

use anyhow::Result;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::catalog::store::PromptKeyStore;
use crate::lww::now_ms;
use crate::models::media::PromptKeyRow;
use crate::prompt::embed::{cosine_similarity, Embedder};

/// 16-hex-char content hash of a normalized cue.
pub fn content_hash(key_norm: &str) -> String {
    let digest = Sha256::digest(key_norm.as_bytes());
    let mut hash = String::with_capacity(16);
    for byte in &digest[..8] {
        hash.push_str(&format!("{byte:02x}"));
    }
    hash
}

pub fn pk_id_for(soul_id: &str, key_hash: &str) -> String {
    format!("{soul_id}:{key_hash}")
}

/// Candidate scan strategy. The default is a linear scan over the
/// persona-scoped candidate set; an approximate-nearest-neighbor index can be
/// substituted without changing resolver contracts.
pub trait SimilarityIndex: Send + Sync {
    /// Best candidate at or above `threshold`. Ties on similarity break toward
    /// the earliest-created key, then identifier order.
    fn best_match<'a>(
        &self,
        query: &[f32],
        candidates: &'a [PromptKeyRow],
        threshold: f64,
    ) -> Option<&'a PromptKeyRow>;
}

pub struct LinearScanIndex;

impl SimilarityIndex for LinearScanIndex {
    fn best_match<'a>(
        &self,
        query: &[f32],
        candidates: &'a [PromptKeyRow],
        threshold: f64,
    ) -> Option<&'a PromptKeyRow> {
        let mut best: Option<(f64, &PromptKeyRow)> = None;
        for candidate in candidates {
            let stored = candidate.embedding();
            let Some(sim) = cosine_similarity(query, &stored) else {
                continue;
            };
            if sim < threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_sim, best_row)) => {
                    sim > best_sim
                        || (sim == best_sim
                            && (candidate.updated_at_ts, &candidate.pk_id)
                                < (best_row.updated_at_ts, &best_row.pk_id))
                }
            };
            if better {
                best = Some((sim, candidate));
            }
        }
        best.map(|(_, row)| row)
    }
}

/// Outcome of resolving a (soul, normalized cue) pair.
pub struct ResolvedKey {
    pub row: PromptKeyRow,
    /// True when no existing key matched; the row has not been persisted yet —
    /// the coordinator writes it alongside the first variant so no key row
    /// ever exists without a confirmed artifact.
    pub created: bool,
}

/// Maps a normalized cue to its cache key. Exact hash match first, then an
/// embedding scan over the soul's existing keys; a new (unpersisted) key row
/// is produced when nothing clears the threshold. Keys are never merged after
/// creation — first match wins.
pub async fn resolve_prompt_key<K: PromptKeyStore + Sync + ?Sized>(
    keys: &K,
    embedder: &dyn Embedder,
    index: &dyn SimilarityIndex,
    soul_id: &str,
    key_norm: &str,
    threshold: f64,
    meta: Value,
) -> Result<ResolvedKey> {
    let key_hash = content_hash(key_norm);

    if let Some(exact) = keys.find_prompt_key_by_hash(soul_id, &key_hash).await? {
        return Ok(ResolvedKey {
            row: exact,
            created: false,
        });
    }

    let embedding = embedder.embed(key_norm);
    let candidates = keys.list_prompt_keys(soul_id).await?;
    if let Some(matched) = index.best_match(&embedding, &candidates, threshold) {
        return Ok(ResolvedKey {
            row: matched.clone(),
            created: false,
        });
    }

    Ok(ResolvedKey {
        row: PromptKeyRow {
            pk_id: pk_id_for(soul_id, &key_hash),
            soul_id: soul_id.to_string(),
            key_norm: key_norm.to_string(),
            key_hash,
            key_embed: PromptKeyRow::encode_embedding(&embedding),
            meta,
            updated_at_ts: now_ms(),
        },
        created: true,
    })
}
