//! The delivery state machine: resolve the cache key, serve an unseen variant
//! if one exists, otherwise generate a fresh one under a best-effort lock.
//!
//! Ordering on the generation path is fixed: render, dedup-check, transcode,
//! upload, then catalog writes. A crash at any point leaves at worst an
//! orphaned object in storage, never a catalog row without an asset.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::store::{
    merge_meta, IdempotencyStore, PromptKeyStore, SeenTracker, Store, StyleRegistry,
    VariantCatalog,
};
use crate::dedup::guard::{self, DedupVerdict};
use crate::dedup::phash;
use crate::errors::AppError;
use crate::locks::{lock_key, LockManager};
use crate::lww::now_ms;
use crate::models::media::{IdempotencyRow, VariantRow};
use crate::models::soul::SoulStyleRow;
use crate::places::chooser;
use crate::prompt::builder::{build_prompt, build_selfie_prompt, ComposedPrompt};
use crate::prompt::embed::Embedder;
use crate::prompt::normalize::normalize_cue;
use crate::prompt::similarity::{resolve_prompt_key, ResolvedKey, SimilarityIndex};
use crate::render::transcode::Transcoder;
use crate::render::{RenderError, RenderProvider};
use crate::storage::ObjectStore;

/// Tuning knobs for one coordinator instance, taken from configuration.
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    pub similarity_threshold: f64,
    pub phash_reject_distance: u32,
    pub max_dedup_attempts: u32,
    pub lock_ttl: Duration,
    pub render_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct VariantRequest {
    pub soul_id: String,
    pub user_id: Uuid,
    pub cue: String,
    pub idempotency_key: Option<String>,
    pub meta: Value,
}

#[derive(Debug, Clone)]
pub struct SelfieRequest {
    pub soul_id: String,
    pub user_id: Uuid,
    pub city_key: String,
    pub mood: String,
    pub idempotency_key: Option<String>,
}

/// The one response shape for both cache hits and fresh generations. Also the
/// payload stored for idempotency replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub variant_id: Uuid,
    pub pk_id: String,
    pub url: String,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landmark: Option<String>,
}

/// Where a fresh asset lands in the object store.
enum AssetSlot {
    Variant,
    Selfie {
        city_key: String,
        landmark_key: String,
    },
}

impl AssetSlot {
    fn storage_key(&self, soul_id: &str, pk_id: &str, variant_id: Uuid, ext: &str) -> String {
        match self {
            AssetSlot::Variant => {
                format!("soul/{soul_id}/key/{pk_id}/variant/{variant_id}.{ext}")
            }
            AssetSlot::Selfie {
                city_key,
                landmark_key,
            } => {
                format!("soul/{soul_id}/selfie/{city_key}/{landmark_key}/{variant_id}.{ext}")
            }
        }
    }
}

pub struct Coordinator {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn SimilarityIndex>,
    provider: Arc<dyn RenderProvider>,
    transcoder: Arc<dyn Transcoder>,
    objects: Arc<dyn ObjectStore>,
    locks: Arc<dyn LockManager>,
    policy: DeliveryPolicy,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn SimilarityIndex>,
        provider: Arc<dyn RenderProvider>,
        transcoder: Arc<dyn Transcoder>,
        objects: Arc<dyn ObjectStore>,
        locks: Arc<dyn LockManager>,
        policy: DeliveryPolicy,
    ) -> Self {
        Self {
            store,
            embedder,
            index,
            provider,
            transcoder,
            objects,
            locks,
            policy,
        }
    }

    /// Delivers a variant for a free-form cue: cache hit when the user has an
    /// unseen variant under the resolved key, fresh generation otherwise.
    pub async fn deliver_variant(&self, req: VariantRequest) -> Result<DeliveryOutcome, AppError> {
        if req.cue.trim().is_empty() {
            return Err(AppError::Validation("cue must not be empty".to_string()));
        }

        if let Some(outcome) = self.replay_idempotent(req.idempotency_key.as_deref()).await? {
            return Ok(outcome);
        }

        let style = self.style_for(&req.soul_id).await?;
        let prompt = build_prompt(&style, req.cue.trim(), &[]);

        let outcome = self
            .deliver(
                &style,
                req.user_id,
                &req.cue,
                prompt,
                AssetSlot::Variant,
                req.meta,
                None,
            )
            .await?;

        self.record_idempotent(req.idempotency_key.as_deref(), &outcome)
            .await?;
        Ok(outcome)
    }

    /// Delivers a selfie-style variant: picks a landmark for the city (unused
    /// first, then least-recently-used with an alternate-composition prompt),
    /// then runs the same cache-or-generate path under the landmark's cue.
    pub async fn deliver_selfie(&self, req: SelfieRequest) -> Result<DeliveryOutcome, AppError> {
        if let Some(outcome) = self.replay_idempotent(req.idempotency_key.as_deref()).await? {
            return Ok(outcome);
        }

        let style = self.style_for(&req.soul_id).await?;

        let place = chooser::choose(
            self.store.as_ref(),
            &req.soul_id,
            &req.city_key,
            Some(req.user_id),
        )
        .await?
        .ok_or_else(|| {
            AppError::Validation(format!("unsupported city '{}'", req.city_key))
        })?;

        info!(
            soul_id = %req.soul_id,
            city = %req.city_key,
            landmark = %place.landmark_key,
            repeated = place.repeated,
            "Selfie landmark chosen"
        );

        let cue = format!(
            "selfie_{}_{}_{}",
            req.city_key, place.landmark_key, req.mood
        );
        let prompt = build_selfie_prompt(
            &style,
            &req.city_key,
            chooser::landmark_description(&place.landmark_key),
            &req.mood,
            place.repeated,
        );

        let slot = AssetSlot::Selfie {
            city_key: req.city_key.clone(),
            landmark_key: place.landmark_key.clone(),
        };
        let meta = serde_json::json!({
            "city": req.city_key,
            "landmark": place.landmark_key,
            "mood": req.mood,
        });

        let outcome = self
            .deliver(
                &style,
                req.user_id,
                &cue,
                prompt,
                slot,
                meta,
                Some(place.landmark_key),
            )
            .await?;

        self.record_idempotent(req.idempotency_key.as_deref(), &outcome)
            .await?;
        Ok(outcome)
    }

    async fn style_for(&self, soul_id: &str) -> Result<SoulStyleRow, AppError> {
        self.store
            .get_style(soul_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no style profile for soul '{soul_id}'")))
    }

    async fn replay_idempotent(
        &self,
        idempotency_key: Option<&str>,
    ) -> Result<Option<DeliveryOutcome>, AppError> {
        let Some(key) = idempotency_key else {
            return Ok(None);
        };
        let Some(stored) = self.store.idempotent_result(key).await? else {
            return Ok(None);
        };
        let outcome: DeliveryOutcome = serde_json::from_value(stored)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("corrupt idempotency record: {e}")))?;
        debug!(idem_key = key, "Replaying stored idempotent result");
        Ok(Some(outcome))
    }

    async fn record_idempotent(
        &self,
        idempotency_key: Option<&str>,
        outcome: &DeliveryOutcome,
    ) -> Result<(), AppError> {
        let Some(key) = idempotency_key else {
            return Ok(());
        };
        let result = serde_json::to_value(outcome)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("serializing outcome: {e}")))?;
        self.store
            .store_idempotent_result(&IdempotencyRow {
                idem_key: key.to_string(),
                result,
                updated_at_ts: now_ms(),
            })
            .await?;
        Ok(())
    }

    async fn deliver(
        &self,
        style: &SoulStyleRow,
        user_id: Uuid,
        cue: &str,
        prompt: ComposedPrompt,
        slot: AssetSlot,
        meta: Value,
        landmark: Option<String>,
    ) -> Result<DeliveryOutcome, AppError> {
        let key_norm = normalize_cue(cue, &style.style_tokens());
        let key_meta = merge_meta(&meta, &serde_json::json!({ "prompt": prompt.positive }));
        let resolved = resolve_prompt_key(
            self.store.as_ref(),
            self.embedder.as_ref(),
            self.index.as_ref(),
            &style.soul_id,
            &key_norm,
            self.policy.similarity_threshold,
            key_meta,
        )
        .await?;

        let existing = if resolved.created {
            Vec::new()
        } else {
            self.store.list_variants(&resolved.row.pk_id).await?
        };

        let unseen = self.store.filter_unseen(user_id, &existing).await?;
        if let Some(hit) = crate::lww::pick_latest(unseen) {
            self.store.mark_seen(user_id, hit.variant_id).await?;
            info!(
                pk_id = %hit.pk_id,
                variant_id = %hit.variant_id,
                "Cache hit: serving existing variant"
            );
            return Ok(DeliveryOutcome {
                variant_id: hit.variant_id,
                pk_id: hit.pk_id,
                url: hit.asset_url,
                cache_hit: true,
                landmark,
            });
        }

        // Novelty exhausted (or brand-new key): generate under a best-effort
        // lock. Failure to acquire reduces to duplicate provider spend, so the
        // request proceeds either way.
        let key = lock_key(&style.soul_id, &key_norm);
        let owner = Uuid::new_v4().to_string();
        let held = match self
            .locks
            .try_acquire(&key, &owner, self.policy.lock_ttl)
            .await
        {
            Ok(acquired) => {
                if !acquired {
                    warn!(lock = %key, "Generation lock busy; proceeding without it");
                }
                acquired
            }
            Err(e) => {
                warn!(lock = %key, "Lock backend unavailable ({e}); proceeding without it");
                false
            }
        };

        let result = self
            .generate(style, user_id, prompt, slot, meta, &resolved, existing, landmark)
            .await;

        if held {
            if let Err(e) = self.locks.release(&key, &owner).await {
                warn!(lock = %key, "Failed to release generation lock: {e}");
            }
        }

        result
    }

    /// The fresh-generation loop: render with a new random seed each attempt,
    /// reject near-duplicates against the key's existing variants, and persist
    /// only after the asset upload succeeded.
    #[allow(clippy::too_many_arguments)]
    async fn generate(
        &self,
        style: &SoulStyleRow,
        user_id: Uuid,
        prompt: ComposedPrompt,
        slot: AssetSlot,
        meta: Value,
        resolved: &ResolvedKey,
        existing: Vec<VariantRow>,
        landmark: Option<String>,
    ) -> Result<DeliveryOutcome, AppError> {
        let mut last_render_error: Option<RenderError> = None;

        for attempt in 1..=self.policy.max_dedup_attempts {
            let seed: u32 = rand::thread_rng().gen();

            let rendered = tokio::time::timeout(
                self.policy.render_timeout,
                self.provider.render(style, &prompt, seed),
            )
            .await;
            let artifact = match rendered {
                Ok(Ok(artifact)) => artifact,
                // Timeouts surface immediately so the lock is released while
                // the provider may still be working.
                Ok(Err(e)) if e.is_timeout() => return Err(AppError::Generation(e)),
                Err(_) => return Err(AppError::Generation(RenderError::Timeout)),
                Ok(Err(e)) => {
                    warn!(attempt, "Render attempt failed: {e}; retrying with a fresh seed");
                    last_render_error = Some(e);
                    continue;
                }
            };
            last_render_error = None;

            let candidate_phash = phash::hash_bytes(&artifact.bytes)?;
            if let DedupVerdict::NearDuplicate {
                variant_id,
                distance,
            } = guard::check(candidate_phash, &existing, self.policy.phash_reject_distance)
            {
                debug!(
                    attempt,
                    %variant_id,
                    distance,
                    "Near-duplicate rejected; retrying with a fresh seed"
                );
                continue;
            }

            let display = self.transcoder.to_display_format(&artifact).await?;
            let variant_id = Uuid::new_v4();
            let storage_key = slot.storage_key(
                &style.soul_id,
                &resolved.row.pk_id,
                variant_id,
                display.extension,
            );
            let asset_url = self
                .objects
                .put(display.bytes, &storage_key, display.content_type)
                .await
                .map_err(|e| AppError::Storage(e.to_string()))?;

            // The key row is persisted with its first variant, never alone.
            if resolved.created {
                self.store.upsert_prompt_key(&resolved.row).await?;
            }

            let variant_meta = merge_meta(
                &meta,
                &serde_json::json!({
                    "prompt": prompt.positive,
                    "width": artifact.width,
                    "height": artifact.height,
                }),
            );
            let row = VariantRow {
                variant_id,
                pk_id: resolved.row.pk_id.clone(),
                soul_id: style.soul_id.clone(),
                asset_url: asset_url.clone(),
                storage_key,
                seed: i64::from(seed),
                phash: candidate_phash,
                meta: variant_meta,
                updated_at_ts: now_ms(),
            };
            self.store.append_variant(&row).await?;
            self.store.mark_seen(user_id, variant_id).await?;

            info!(
                pk_id = %row.pk_id,
                %variant_id,
                attempt,
                "Generated and cataloged fresh variant"
            );
            return Ok(DeliveryOutcome {
                variant_id,
                pk_id: row.pk_id,
                url: asset_url,
                cache_hit: false,
                landmark: landmark.clone(),
            });
        }

        if let Some(e) = last_render_error {
            return Err(AppError::Generation(e));
        }
        Err(AppError::DedupExhausted {
            attempts: self.policy.max_dedup_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::MemoryStore;
    use crate::locks::MemoryLockManager;
    use crate::prompt::embed::HashingEmbedder;
    use crate::prompt::similarity::LinearScanIndex;
    use crate::render::transcode::PngTranscoder;
    use crate::render::Artifact;
    use crate::storage::MemoryObjectStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use image::{GrayImage, ImageOutputFormat, Luma};
    use serde_json::json;
    use sha2::{Digest, Sha256};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Deterministic fake provider: each (prompt, seed) pair maps to a unique
    /// 16x16 black-and-white pattern, so distinct seeds yield perceptually
    /// distant images and identical seeds collide exactly.
    struct FakeProvider {
        calls: AtomicU32,
        ignore_seed: bool,
    }

    impl FakeProvider {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                ignore_seed: false,
            }
        }

        fn seed_blind() -> Self {
            Self {
                calls: AtomicU32::new(0),
                ignore_seed: true,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RenderProvider for FakeProvider {
        async fn render(
            &self,
            _style: &SoulStyleRow,
            prompt: &ComposedPrompt,
            seed: u32,
        ) -> Result<Artifact, RenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let effective_seed = if self.ignore_seed { 0 } else { seed };
            let digest = Sha256::digest(format!("{}|{effective_seed}", prompt.positive));
            // 256 digest bits drive 256 pixels.
            let mut img = GrayImage::new(16, 16);
            for (i, px) in img.pixels_mut().enumerate() {
                let bit = (digest[i / 8] >> (i % 8)) & 1;
                *px = Luma([if bit == 1 { 255 } else { 0 }]);
            }
            let mut buf = std::io::Cursor::new(Vec::new());
            image::DynamicImage::ImageLuma8(img)
                .write_to(&mut buf, ImageOutputFormat::Png)
                .map_err(|_| RenderError::EmptyArtifact)?;
            Ok(Artifact {
                bytes: Bytes::from(buf.into_inner()),
                mime: "image/png".to_string(),
                width: 16,
                height: 16,
            })
        }
    }

    fn policy() -> DeliveryPolicy {
        DeliveryPolicy {
            similarity_threshold: 0.85,
            phash_reject_distance: 5,
            max_dedup_attempts: 3,
            lock_ttl: Duration::from_secs(300),
            render_timeout: Duration::from_secs(5),
        }
    }

    fn coordinator(provider: Arc<dyn RenderProvider>) -> (Coordinator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let coordinator = Coordinator::new(
            store.clone(),
            Arc::new(HashingEmbedder::default()),
            Arc::new(LinearScanIndex),
            provider,
            Arc::new(PngTranscoder),
            Arc::new(MemoryObjectStore::new()),
            Arc::new(MemoryLockManager::new()),
            policy(),
        );
        (coordinator, store)
    }

    async fn seed_style(store: &MemoryStore, soul_id: &str) {
        store
            .upsert_style(&SoulStyleRow {
                soul_id: soul_id.to_string(),
                base_model_ref: "sdxl@v10".to_string(),
                lora_ids: vec!["anime_style@v1".to_string()],
                palette: json!({"primary": "pastel pink"}),
                negatives: vec!["blurry".to_string()],
                motion_module: None,
                extra: json!({}),
                updated_at_ts: 1,
            })
            .await
            .unwrap();
    }

    fn request(soul_id: &str, user_id: Uuid, cue: &str) -> VariantRequest {
        VariantRequest {
            soul_id: soul_id.to_string(),
            user_id,
            cue: cue.to_string(),
            idempotency_key: None,
            meta: json!({}),
        }
    }

    #[tokio::test]
    async fn test_unknown_soul_is_not_found() {
        let (coordinator, _) = coordinator(Arc::new(FakeProvider::new()));
        let err = coordinator
            .deliver_variant(request("ghost", Uuid::new_v4(), "penguin"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_empty_cue_is_rejected() {
        let (coordinator, store) = coordinator(Arc::new(FakeProvider::new()));
        seed_style(&store, "nova").await;
        let err = coordinator
            .deliver_variant(request("nova", Uuid::new_v4(), "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_first_request_generates_fresh_variant() {
        let provider = Arc::new(FakeProvider::new());
        let (coordinator, store) = coordinator(provider.clone());
        seed_style(&store, "nova").await;

        let outcome = coordinator
            .deliver_variant(request("nova", Uuid::new_v4(), "cute penguin on ice"))
            .await
            .unwrap();
        assert!(!outcome.cache_hit);
        assert_eq!(provider.calls(), 1);
        assert!(outcome.url.starts_with("mem://soul/nova/key/"));

        let variants = store.list_variants(&outcome.pk_id).await.unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].variant_id, outcome.variant_id);
    }

    #[tokio::test]
    async fn test_second_user_hits_cache_without_generation() {
        let provider = Arc::new(FakeProvider::new());
        let (coordinator, store) = coordinator(provider.clone());
        seed_style(&store, "nova").await;

        let first = coordinator
            .deliver_variant(request("nova", Uuid::new_v4(), "cute penguin on ice"))
            .await
            .unwrap();
        let second = coordinator
            .deliver_variant(request("nova", Uuid::new_v4(), "cute penguin on ice"))
            .await
            .unwrap();

        assert!(second.cache_hit);
        assert_eq!(second.variant_id, first.variant_id);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_same_user_never_sees_the_same_variant_twice() {
        let provider = Arc::new(FakeProvider::new());
        let (coordinator, store) = coordinator(provider.clone());
        seed_style(&store, "nova").await;
        let user = Uuid::new_v4();

        let first = coordinator
            .deliver_variant(request("nova", user, "cute penguin on ice"))
            .await
            .unwrap();
        let second = coordinator
            .deliver_variant(request("nova", user, "cute penguin on ice"))
            .await
            .unwrap();

        assert!(!second.cache_hit);
        assert_ne!(second.variant_id, first.variant_id);
        assert_eq!(provider.calls(), 2);
        assert_eq!(store.list_variants(&first.pk_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_equivalent_cues_share_one_cache_key() {
        let provider = Arc::new(FakeProvider::new());
        let (coordinator, store) = coordinator(provider.clone());
        seed_style(&store, "nova").await;

        let first = coordinator
            .deliver_variant(request(
                "nova",
                Uuid::new_v4(),
                "arctic colony cute frost glacier ice penguin snow waddle winter",
            ))
            .await
            .unwrap();
        let second = coordinator
            .deliver_variant(request(
                "nova",
                Uuid::new_v4(),
                "arctic colony cute frost glacier ice penguin snow huddle winter",
            ))
            .await
            .unwrap();

        assert_eq!(second.pk_id, first.pk_id);
        assert!(second.cache_hit);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_seed_blind_provider_exhausts_dedup() {
        let provider = Arc::new(FakeProvider::seed_blind());
        let (coordinator, store) = coordinator(provider.clone());
        seed_style(&store, "nova").await;
        let user = Uuid::new_v4();

        // First request catalogs the one image the provider can make.
        coordinator
            .deliver_variant(request("nova", user, "cute penguin on ice"))
            .await
            .unwrap();

        // The same user needs a novel variant, but every attempt collides.
        let err = coordinator
            .deliver_variant(request("nova", user, "cute penguin on ice"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DedupExhausted { attempts: 3 }));
        assert_eq!(provider.calls(), 1 + 3);

        // Nothing new was cataloged by the failed attempts.
        let keys = store.list_prompt_keys("nova").await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(store.list_variants(&keys[0].pk_id).await.unwrap().len(), 1);
    }

    /// Provider that fails every render call with a non-timeout error.
    struct BrokenProvider {
        calls: AtomicU32,
    }

    #[async_trait]
    impl RenderProvider for BrokenProvider {
        async fn render(
            &self,
            _style: &SoulStyleRow,
            _prompt: &ComposedPrompt,
            _seed: u32,
        ) -> Result<Artifact, RenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(RenderError::Api {
                status: 500,
                message: "model crashed".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_provider_failures_are_retried_then_surfaced() {
        let provider = Arc::new(BrokenProvider {
            calls: AtomicU32::new(0),
        });
        let (coordinator, store) = coordinator(provider.clone());
        seed_style(&store, "nova").await;

        let err = coordinator
            .deliver_variant(request("nova", Uuid::new_v4(), "cute penguin on ice"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Generation(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

        // Failed generation leaves no catalog state behind.
        assert!(store.list_prompt_keys("nova").await.unwrap().is_empty());
    }

    /// Lock backend that always fails, as a hard-down Redis would.
    struct DownLockManager;

    #[async_trait]
    impl crate::locks::LockManager for DownLockManager {
        async fn try_acquire(&self, _key: &str, _owner: &str, _ttl: Duration) -> anyhow::Result<bool> {
            Err(anyhow::anyhow!("connection refused"))
        }

        async fn release(&self, _key: &str, _owner: &str) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    #[tokio::test]
    async fn test_generation_proceeds_when_lock_backend_is_down() {
        let provider = Arc::new(FakeProvider::new());
        let store = Arc::new(MemoryStore::new());
        let coordinator = Coordinator::new(
            store.clone(),
            Arc::new(HashingEmbedder::default()),
            Arc::new(LinearScanIndex),
            provider.clone(),
            Arc::new(PngTranscoder),
            Arc::new(MemoryObjectStore::new()),
            Arc::new(DownLockManager),
            policy(),
        );
        seed_style(&store, "nova").await;

        let outcome = coordinator
            .deliver_variant(request("nova", Uuid::new_v4(), "cute penguin on ice"))
            .await
            .unwrap();
        assert!(!outcome.cache_hit);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_idempotency_replays_stored_outcome() {
        let provider = Arc::new(FakeProvider::new());
        let (coordinator, store) = coordinator(provider.clone());
        seed_style(&store, "nova").await;
        let user = Uuid::new_v4();

        let mut req = request("nova", user, "cute penguin on ice");
        req.idempotency_key = Some("req-42".to_string());

        let first = coordinator.deliver_variant(req.clone()).await.unwrap();
        let replay = coordinator.deliver_variant(req).await.unwrap();

        assert_eq!(replay.variant_id, first.variant_id);
        assert_eq!(replay.cache_hit, first.cache_hit);
        // Replay short-circuits before any catalog or provider work.
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_selfie_rotates_landmarks_and_names_them() {
        let provider = Arc::new(FakeProvider::new());
        let (coordinator, store) = coordinator(provider.clone());
        seed_style(&store, "nova").await;
        let user = Uuid::new_v4();

        fn selfie_request(user: Uuid) -> SelfieRequest {
            SelfieRequest {
                soul_id: "nova".to_string(),
                user_id: user,
                city_key: "paris".to_string(),
                mood: "happy".to_string(),
                idempotency_key: None,
            }
        }

        let first = coordinator.deliver_selfie(selfie_request(user)).await.unwrap();
        let second = coordinator.deliver_selfie(selfie_request(user)).await.unwrap();

        assert_eq!(first.landmark.as_deref(), Some("eiffel_tower"));
        assert_eq!(second.landmark.as_deref(), Some("louvre"));
        assert_ne!(first.pk_id, second.pk_id);
        assert!(first.url.contains("/selfie/paris/eiffel_tower/"));
    }

    #[tokio::test]
    async fn test_selfie_unknown_city_is_validation_error() {
        let (coordinator, store) = coordinator(Arc::new(FakeProvider::new()));
        seed_style(&store, "nova").await;

        let err = coordinator
            .deliver_selfie(SelfieRequest {
                soul_id: "nova".to_string(),
                user_id: Uuid::new_v4(),
                city_key: "atlantis".to_string(),
                mood: "happy".to_string(),
                idempotency_key: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
