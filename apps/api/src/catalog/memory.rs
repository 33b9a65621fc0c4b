//! In-memory store used by tests.
//!
//! Implements the same contracts as `PgStore`, including the LWW upsert guard,
//! so coordinator behavior can be exercised without a database.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::catalog::store::{
    merge_meta, IdempotencyStore, LandmarkLog, PromptKeyStore, SeenTracker, StyleRegistry,
    VariantCatalog,
};
use crate::lww::{now_ms, wins};
use crate::models::media::{IdempotencyRow, LandmarkUsageRow, PromptKeyRow, VariantRow};
use crate::models::soul::SoulStyleRow;

#[derive(Default)]
struct Inner {
    prompt_keys: HashMap<String, PromptKeyRow>,
    variants: HashMap<Uuid, VariantRow>,
    seen: HashSet<(Uuid, Uuid)>,
    landmarks: HashMap<(String, String, String, String), LandmarkUsageRow>,
    idempotency: HashMap<String, IdempotencyRow>,
    styles: HashMap<String, SoulStyleRow>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PromptKeyStore for MemoryStore {
    async fn find_prompt_key_by_hash(
        &self,
        soul_id: &str,
        key_hash: &str,
    ) -> Result<Option<PromptKeyRow>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .prompt_keys
            .values()
            .find(|pk| pk.soul_id == soul_id && pk.key_hash == key_hash)
            .cloned())
    }

    async fn list_prompt_keys(&self, soul_id: &str) -> Result<Vec<PromptKeyRow>> {
        let inner = self.inner.lock().await;
        let mut keys: Vec<PromptKeyRow> = inner
            .prompt_keys
            .values()
            .filter(|pk| pk.soul_id == soul_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| {
            a.updated_at_ts
                .cmp(&b.updated_at_ts)
                .then_with(|| a.pk_id.cmp(&b.pk_id))
        });
        Ok(keys)
    }

    async fn upsert_prompt_key(&self, row: &PromptKeyRow) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.prompt_keys.get(&row.pk_id) {
            Some(existing) if !wins(row, existing) => {}
            _ => {
                inner.prompt_keys.insert(row.pk_id.clone(), row.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VariantCatalog for MemoryStore {
    async fn list_variants(&self, pk_id: &str) -> Result<Vec<VariantRow>> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<VariantRow> = inner
            .variants
            .values()
            .filter(|v| v.pk_id == pk_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.updated_at_ts
                .cmp(&a.updated_at_ts)
                .then_with(|| b.variant_id.cmp(&a.variant_id))
        });
        Ok(rows)
    }

    async fn append_variant(&self, row: &VariantRow) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.variants.get(&row.variant_id) {
            Some(existing) if !wins(row, existing) => {}
            _ => {
                inner.variants.insert(row.variant_id, row.clone());
            }
        }
        Ok(())
    }

    async fn amend_variant(&self, variant_id: Uuid, meta_delta: &Value) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let existing = inner
            .variants
            .get_mut(&variant_id)
            .ok_or_else(|| anyhow::anyhow!("variant {variant_id} not found for amendment"))?;
        let ts = now_ms();
        if ts >= existing.updated_at_ts {
            existing.meta = merge_meta(&existing.meta, meta_delta);
            existing.updated_at_ts = ts;
        }
        Ok(())
    }
}

#[async_trait]
impl SeenTracker for MemoryStore {
    async fn has_seen(&self, user_id: Uuid, variant_id: Uuid) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.seen.contains(&(user_id, variant_id)))
    }

    async fn mark_seen(&self, user_id: Uuid, variant_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.seen.insert((user_id, variant_id));
        Ok(())
    }

    async fn filter_unseen(
        &self,
        user_id: Uuid,
        candidates: &[VariantRow],
    ) -> Result<Vec<VariantRow>> {
        let inner = self.inner.lock().await;
        Ok(candidates
            .iter()
            .filter(|v| !inner.seen.contains(&(user_id, v.variant_id)))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LandmarkLog for MemoryStore {
    async fn landmark_usages(
        &self,
        soul_id: &str,
        city_key: &str,
        user_scope: &str,
    ) -> Result<Vec<LandmarkUsageRow>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .landmarks
            .values()
            .filter(|u| {
                u.soul_id == soul_id && u.city_key == city_key && u.user_scope == user_scope
            })
            .cloned()
            .collect())
    }

    async fn record_landmark_use(&self, row: &LandmarkUsageRow) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let key = (
            row.soul_id.clone(),
            row.city_key.clone(),
            row.landmark_key.clone(),
            row.user_scope.clone(),
        );
        match inner.landmarks.get(&key) {
            Some(existing) if row.used_at_ts < existing.used_at_ts => {}
            _ => {
                inner.landmarks.insert(key, row.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for MemoryStore {
    async fn idempotent_result(&self, idem_key: &str) -> Result<Option<Value>> {
        let inner = self.inner.lock().await;
        Ok(inner.idempotency.get(idem_key).map(|r| r.result.clone()))
    }

    async fn store_idempotent_result(&self, row: &IdempotencyRow) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.idempotency.get(&row.idem_key) {
            Some(existing) if row.updated_at_ts < existing.updated_at_ts => {}
            _ => {
                inner.idempotency.insert(row.idem_key.clone(), row.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StyleRegistry for MemoryStore {
    async fn get_style(&self, soul_id: &str) -> Result<Option<SoulStyleRow>> {
        let inner = self.inner.lock().await;
        Ok(inner.styles.get(soul_id).cloned())
    }

    async fn upsert_style(&self, row: &SoulStyleRow) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.styles.get(&row.soul_id) {
            Some(existing) if !wins(row, existing) => {}
            _ => {
                inner.styles.insert(row.soul_id.clone(), row.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn variant(id: Uuid, pk_id: &str, ts: i64) -> VariantRow {
        VariantRow {
            variant_id: id,
            pk_id: pk_id.to_string(),
            soul_id: "nova".to_string(),
            asset_url: format!("/assets/{id}.png"),
            storage_key: format!("soul/nova/key/{pk_id}/variant/{id}.png"),
            seed: 7,
            phash: 0,
            meta: json!({}),
            updated_at_ts: ts,
        }
    }

    #[tokio::test]
    async fn test_append_is_lww_under_reordering() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let older = variant(id, "nova:k", 100);
        let mut newer = variant(id, "nova:k", 200);
        newer.meta = json!({"winner": true});

        store.append_variant(&newer).await.unwrap();
        store.append_variant(&older).await.unwrap();

        let rows = store.list_variants("nova:k").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].meta, json!({"winner": true}));
        assert_eq!(rows[0].updated_at_ts, 200);
    }

    #[tokio::test]
    async fn test_mark_seen_is_idempotent() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let v = Uuid::new_v4();
        store.mark_seen(user, v).await.unwrap();
        store.mark_seen(user, v).await.unwrap();
        assert!(store.has_seen(user, v).await.unwrap());
    }

    #[tokio::test]
    async fn test_filter_unseen_is_a_set_difference() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let a = variant(Uuid::new_v4(), "nova:k", 1);
        let b = variant(Uuid::new_v4(), "nova:k", 2);
        store.mark_seen(user, a.variant_id).await.unwrap();

        let unseen = store
            .filter_unseen(user, &[a.clone(), b.clone()])
            .await
            .unwrap();
        assert_eq!(unseen.len(), 1);
        assert_eq!(unseen[0].variant_id, b.variant_id);
    }

    #[tokio::test]
    async fn test_amend_merges_meta_only() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let mut row = variant(id, "nova:k", 1);
        row.meta = json!({"seed_note": "kept"});
        store.append_variant(&row).await.unwrap();

        store
            .amend_variant(id, &json!({"reviewed": true}))
            .await
            .unwrap();

        let rows = store.list_variants("nova:k").await.unwrap();
        assert_eq!(rows[0].meta, json!({"seed_note": "kept", "reviewed": true}));
        assert_eq!(rows[0].asset_url, row.asset_url);
        assert!(rows[0].updated_at_ts >= row.updated_at_ts);
    }
}
