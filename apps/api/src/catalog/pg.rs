//! Postgres-backed store.
//!
//! Every write is a single-row LWW upsert: the `WHERE updated_at_ts <=
//! EXCLUDED.updated_at_ts` guard makes concurrent writes to the same
//! identifier commute to the highest timestamp without any transaction or row
//! lock. Seen records are insert-only (`DO NOTHING`). Reads are single-key
//! fetches; no query joins tables.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::catalog::store::{
    merge_meta, IdempotencyStore, LandmarkLog, PromptKeyStore, SeenTracker, StyleRegistry,
    VariantCatalog,
};
use crate::lww::now_ms;
use crate::models::media::{IdempotencyRow, LandmarkUsageRow, PromptKeyRow, VariantRow};
use crate::models::soul::SoulStyleRow;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PromptKeyStore for PgStore {
    async fn find_prompt_key_by_hash(
        &self,
        soul_id: &str,
        key_hash: &str,
    ) -> Result<Option<PromptKeyRow>> {
        Ok(sqlx::query_as::<_, PromptKeyRow>(
            "SELECT * FROM prompt_keys WHERE soul_id = $1 AND key_hash = $2",
        )
        .bind(soul_id)
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn list_prompt_keys(&self, soul_id: &str) -> Result<Vec<PromptKeyRow>> {
        Ok(sqlx::query_as::<_, PromptKeyRow>(
            "SELECT * FROM prompt_keys WHERE soul_id = $1 ORDER BY updated_at_ts ASC, pk_id ASC",
        )
        .bind(soul_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn upsert_prompt_key(&self, row: &PromptKeyRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO prompt_keys
                (pk_id, soul_id, key_norm, key_hash, key_embed, meta, updated_at_ts)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (pk_id) DO UPDATE SET
                key_norm = EXCLUDED.key_norm,
                key_hash = EXCLUDED.key_hash,
                key_embed = EXCLUDED.key_embed,
                meta = EXCLUDED.meta,
                updated_at_ts = EXCLUDED.updated_at_ts
            WHERE prompt_keys.updated_at_ts <= EXCLUDED.updated_at_ts
            "#,
        )
        .bind(&row.pk_id)
        .bind(&row.soul_id)
        .bind(&row.key_norm)
        .bind(&row.key_hash)
        .bind(&row.key_embed)
        .bind(&row.meta)
        .bind(row.updated_at_ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl VariantCatalog for PgStore {
    async fn list_variants(&self, pk_id: &str) -> Result<Vec<VariantRow>> {
        Ok(sqlx::query_as::<_, VariantRow>(
            "SELECT * FROM variants WHERE pk_id = $1 ORDER BY updated_at_ts DESC, variant_id DESC",
        )
        .bind(pk_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn append_variant(&self, row: &VariantRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO variants
                (variant_id, pk_id, soul_id, asset_url, storage_key, seed, phash, meta,
                 updated_at_ts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (variant_id) DO UPDATE SET
                meta = EXCLUDED.meta,
                updated_at_ts = EXCLUDED.updated_at_ts
            WHERE variants.updated_at_ts <= EXCLUDED.updated_at_ts
            "#,
        )
        .bind(row.variant_id)
        .bind(&row.pk_id)
        .bind(&row.soul_id)
        .bind(&row.asset_url)
        .bind(&row.storage_key)
        .bind(row.seed)
        .bind(row.phash)
        .bind(&row.meta)
        .bind(row.updated_at_ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn amend_variant(&self, variant_id: Uuid, meta_delta: &Value) -> Result<()> {
        let existing: Option<VariantRow> =
            sqlx::query_as("SELECT * FROM variants WHERE variant_id = $1")
                .bind(variant_id)
                .fetch_optional(&self.pool)
                .await?;
        let existing = existing
            .ok_or_else(|| anyhow::anyhow!("variant {variant_id} not found for amendment"))?;

        let merged = merge_meta(&existing.meta, meta_delta);
        sqlx::query(
            r#"
            UPDATE variants SET meta = $2, updated_at_ts = $3
            WHERE variant_id = $1 AND updated_at_ts <= $3
            "#,
        )
        .bind(variant_id)
        .bind(&merged)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SeenTracker for PgStore {
    async fn has_seen(&self, user_id: Uuid, variant_id: Uuid) -> Result<bool> {
        let hit: Option<(Uuid,)> = sqlx::query_as(
            "SELECT variant_id FROM user_seen WHERE user_id = $1 AND variant_id = $2",
        )
        .bind(user_id)
        .bind(variant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(hit.is_some())
    }

    async fn mark_seen(&self, user_id: Uuid, variant_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_seen (user_id, variant_id, seen_at_ts)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, variant_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(variant_id)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn filter_unseen(
        &self,
        user_id: Uuid,
        candidates: &[VariantRow],
    ) -> Result<Vec<VariantRow>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let candidate_ids: Vec<Uuid> = candidates.iter().map(|v| v.variant_id).collect();
        let seen: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT variant_id FROM user_seen WHERE user_id = $1 AND variant_id = ANY($2)",
        )
        .bind(user_id)
        .bind(&candidate_ids)
        .fetch_all(&self.pool)
        .await?;

        let seen_ids: std::collections::HashSet<Uuid> = seen.into_iter().map(|(id,)| id).collect();
        Ok(candidates
            .iter()
            .filter(|v| !seen_ids.contains(&v.variant_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LandmarkLog for PgStore {
    async fn landmark_usages(
        &self,
        soul_id: &str,
        city_key: &str,
        user_scope: &str,
    ) -> Result<Vec<LandmarkUsageRow>> {
        Ok(sqlx::query_as::<_, LandmarkUsageRow>(
            r#"
            SELECT * FROM landmark_log
            WHERE soul_id = $1 AND city_key = $2 AND user_scope = $3
            "#,
        )
        .bind(soul_id)
        .bind(city_key)
        .bind(user_scope)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn record_landmark_use(&self, row: &LandmarkUsageRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO landmark_log (soul_id, city_key, landmark_key, user_scope, used_at_ts)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (soul_id, city_key, landmark_key, user_scope) DO UPDATE SET
                used_at_ts = EXCLUDED.used_at_ts
            WHERE landmark_log.used_at_ts <= EXCLUDED.used_at_ts
            "#,
        )
        .bind(&row.soul_id)
        .bind(&row.city_key)
        .bind(&row.landmark_key)
        .bind(&row.user_scope)
        .bind(row.used_at_ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for PgStore {
    async fn idempotent_result(&self, idem_key: &str) -> Result<Option<Value>> {
        let row: Option<IdempotencyRow> =
            sqlx::query_as("SELECT * FROM idempotency WHERE idem_key = $1")
                .bind(idem_key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| r.result))
    }

    async fn store_idempotent_result(&self, row: &IdempotencyRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO idempotency (idem_key, result, updated_at_ts)
            VALUES ($1, $2, $3)
            ON CONFLICT (idem_key) DO UPDATE SET
                result = EXCLUDED.result,
                updated_at_ts = EXCLUDED.updated_at_ts
            WHERE idempotency.updated_at_ts <= EXCLUDED.updated_at_ts
            "#,
        )
        .bind(&row.idem_key)
        .bind(&row.result)
        .bind(row.updated_at_ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StyleRegistry for PgStore {
    async fn get_style(&self, soul_id: &str) -> Result<Option<SoulStyleRow>> {
        Ok(
            sqlx::query_as::<_, SoulStyleRow>(
                "SELECT * FROM soul_style_profiles WHERE soul_id = $1",
            )
            .bind(soul_id)
            .fetch_optional(&self.pool)
            .await?,
        )
    }

    async fn upsert_style(&self, row: &SoulStyleRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO soul_style_profiles
                (soul_id, base_model_ref, lora_ids, palette, negatives, motion_module, extra,
                 updated_at_ts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (soul_id) DO UPDATE SET
                base_model_ref = EXCLUDED.base_model_ref,
                lora_ids = EXCLUDED.lora_ids,
                palette = EXCLUDED.palette,
                negatives = EXCLUDED.negatives,
                motion_module = EXCLUDED.motion_module,
                extra = EXCLUDED.extra,
                updated_at_ts = EXCLUDED.updated_at_ts
            WHERE soul_style_profiles.updated_at_ts <= EXCLUDED.updated_at_ts
            "#,
        )
        .bind(&row.soul_id)
        .bind(&row.base_model_ref)
        .bind(&row.lora_ids)
        .bind(&row.palette)
        .bind(&row.negatives)
        .bind(&row.motion_module)
        .bind(&row.extra)
        .bind(row.updated_at_ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
