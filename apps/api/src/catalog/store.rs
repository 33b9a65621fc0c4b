//! Store contracts for every persisted entity.
//!
//! The coordinator only ever talks to these traits, never to a concrete
//! backend. Production wires in `PgStore`; tests wire in `MemoryStore` behind
//! the same contracts. No operation here requires a join — each entity is an
//! independently-keyed record set.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::models::media::{IdempotencyRow, LandmarkUsageRow, PromptKeyRow, VariantRow};
use crate::models::soul::SoulStyleRow;

#[async_trait]
pub trait PromptKeyStore {
    /// Exact-hash lookup, used as a fast pre-check before embedding scans.
    async fn find_prompt_key_by_hash(
        &self,
        soul_id: &str,
        key_hash: &str,
    ) -> Result<Option<PromptKeyRow>>;

    /// The persona-scoped candidate set for similarity resolution.
    async fn list_prompt_keys(&self, soul_id: &str) -> Result<Vec<PromptKeyRow>>;

    async fn upsert_prompt_key(&self, row: &PromptKeyRow) -> Result<()>;
}

#[async_trait]
pub trait VariantCatalog {
    /// Single fetch by cache key, no filters.
    async fn list_variants(&self, pk_id: &str) -> Result<Vec<VariantRow>>;

    /// Inserts a new identifier. LWW-safe: a concurrent duplicate write to the
    /// same identifier resolves to the highest timestamp.
    async fn append_variant(&self, row: &VariantRow) -> Result<()>;

    /// Merges `meta_delta` into the variant's metadata and bumps the
    /// timestamp. The asset reference and seed are never touched.
    async fn amend_variant(&self, variant_id: Uuid, meta_delta: &Value) -> Result<()>;
}

#[async_trait]
pub trait SeenTracker {
    async fn has_seen(&self, user_id: Uuid, variant_id: Uuid) -> Result<bool>;

    /// Insert-only; marking the same pair twice is a no-op.
    async fn mark_seen(&self, user_id: Uuid, variant_id: Uuid) -> Result<()>;

    /// Set difference: candidates minus the user's seen records, computed in
    /// memory after a single fetch restricted to the candidate identifiers.
    async fn filter_unseen(
        &self,
        user_id: Uuid,
        candidates: &[VariantRow],
    ) -> Result<Vec<VariantRow>>;
}

#[async_trait]
pub trait LandmarkLog {
    async fn landmark_usages(
        &self,
        soul_id: &str,
        city_key: &str,
        user_scope: &str,
    ) -> Result<Vec<LandmarkUsageRow>>;

    /// Overwrites the usage row for (soul, city, landmark, scope) under LWW.
    async fn record_landmark_use(&self, row: &LandmarkUsageRow) -> Result<()>;
}

#[async_trait]
pub trait IdempotencyStore {
    async fn idempotent_result(&self, idem_key: &str) -> Result<Option<Value>>;
    async fn store_idempotent_result(&self, row: &IdempotencyRow) -> Result<()>;
}

#[async_trait]
pub trait StyleRegistry {
    async fn get_style(&self, soul_id: &str) -> Result<Option<SoulStyleRow>>;
    async fn upsert_style(&self, row: &SoulStyleRow) -> Result<()>;
}

/// Everything the coordinator needs, as one injectable object.
pub trait Store:
    PromptKeyStore
    + VariantCatalog
    + SeenTracker
    + LandmarkLog
    + IdempotencyStore
    + StyleRegistry
    + Send
    + Sync
{
}

impl<T> Store for T where
    T: PromptKeyStore
        + VariantCatalog
        + SeenTracker
        + LandmarkLog
        + IdempotencyStore
        + StyleRegistry
        + Send
        + Sync
{
}

/// Shallow-merges `delta`'s top-level keys into `base`. Non-object metadata is
/// replaced wholesale.
pub fn merge_meta(base: &Value, delta: &Value) -> Value {
    match (base, delta) {
        (Value::Object(base_map), Value::Object(delta_map)) => {
            let mut merged = base_map.clone();
            for (k, v) in delta_map {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        _ => delta.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_meta_overrides_and_keeps() {
        let base = json!({"seed": 42, "city": "paris"});
        let delta = json!({"city": "tokyo", "mood": "happy"});
        assert_eq!(
            merge_meta(&base, &delta),
            json!({"seed": 42, "city": "tokyo", "mood": "happy"})
        );
    }

    #[test]
    fn test_merge_meta_non_object_replaces() {
        assert_eq!(merge_meta(&json!(null), &json!({"a": 1})), json!({"a": 1}));
    }
}
