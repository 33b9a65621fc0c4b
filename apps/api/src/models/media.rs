use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::lww::LwwStamped;

/// A cache bucket: one persona-scoped family of semantically equivalent cues.
///
/// `pk_id` is `{soul_id}:{key_hash}`. The embedding is stored as little-endian
/// f32 bytes so the row round-trips through Postgres BYTEA without a vector
/// extension.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PromptKeyRow {
    pub pk_id: String,
    pub soul_id: String,
    pub key_norm: String,
    pub key_hash: String,
    pub key_embed: Vec<u8>,
    pub meta: Value,
    pub updated_at_ts: i64,
}

impl PromptKeyRow {
    pub fn embedding(&self) -> Vec<f32> {
        self.key_embed
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
    }
}

impl LwwStamped for PromptKeyRow {
    type Id = String;

    fn lww_id(&self) -> String {
        self.pk_id.clone()
    }
    fn lww_ts(&self) -> i64 {
        self.updated_at_ts
    }
}

/// One generated artifact under a PromptKey. `soul_id` is denormalized so all
/// lookups stay single-key. Immutable once the asset reference is set; only
/// `meta` and the timestamp may be amended under LWW.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VariantRow {
    pub variant_id: Uuid,
    pub pk_id: String,
    pub soul_id: String,
    pub asset_url: String,
    pub storage_key: String,
    pub seed: i64,
    pub phash: i64,
    pub meta: Value,
    pub updated_at_ts: i64,
}

impl LwwStamped for VariantRow {
    type Id = Uuid;

    fn lww_id(&self) -> Uuid {
        self.variant_id
    }
    fn lww_ts(&self) -> i64 {
        self.updated_at_ts
    }
}

/// Insert-only record: this user has already received this variant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SeenRow {
    pub user_id: Uuid,
    pub variant_id: Uuid,
    pub seen_at_ts: i64,
}

/// When a landmark was last used for a (soul, city) pair, optionally scoped
/// to a user. Overwritten LWW on every selection.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LandmarkUsageRow {
    pub soul_id: String,
    pub city_key: String,
    pub landmark_key: String,
    pub user_scope: String,
    pub used_at_ts: i64,
}

/// Stored result for a caller-supplied idempotency token.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IdempotencyRow {
    pub idem_key: String,
    pub result: Value,
    pub updated_at_ts: i64,
}
