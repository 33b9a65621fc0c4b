use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::catalog::store::StyleRegistry;
use crate::delivery::coordinator::{DeliveryOutcome, SelfieRequest, VariantRequest};
use crate::errors::AppError;
use crate::lww::now_ms;
use crate::models::soul::SoulStyleRow;
use crate::state::AppState;

fn default_meta() -> Value {
    Value::Object(serde_json::Map::new())
}

fn default_mood() -> String {
    "happy".to_string()
}

#[derive(Deserialize)]
pub struct VariantRequestBody {
    pub soul_id: String,
    pub user_id: Uuid,
    pub cue: String,
    pub idempotency_key: Option<String>,
    #[serde(default = "default_meta")]
    pub meta: Value,
}

/// POST /api/v1/variants
pub async fn handle_get_variant(
    State(state): State<AppState>,
    Json(body): Json<VariantRequestBody>,
) -> Result<Json<DeliveryOutcome>, AppError> {
    let outcome = state
        .coordinator
        .deliver_variant(VariantRequest {
            soul_id: body.soul_id,
            user_id: body.user_id,
            cue: body.cue,
            idempotency_key: body.idempotency_key,
            meta: body.meta,
        })
        .await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
pub struct SelfieRequestBody {
    pub soul_id: String,
    pub user_id: Uuid,
    pub city: String,
    #[serde(default = "default_mood")]
    pub mood: String,
    pub idempotency_key: Option<String>,
}

/// POST /api/v1/selfies
pub async fn handle_get_selfie(
    State(state): State<AppState>,
    Json(body): Json<SelfieRequestBody>,
) -> Result<Json<DeliveryOutcome>, AppError> {
    let outcome = state
        .coordinator
        .deliver_selfie(SelfieRequest {
            soul_id: body.soul_id,
            user_id: body.user_id,
            city_key: body.city,
            mood: body.mood,
            idempotency_key: body.idempotency_key,
        })
        .await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
pub struct StyleUpsertBody {
    pub soul_id: String,
    pub base_model_ref: String,
    #[serde(default)]
    pub lora_ids: Vec<String>,
    #[serde(default = "default_meta")]
    pub palette: Value,
    #[serde(default)]
    pub negatives: Vec<String>,
    pub motion_module: Option<String>,
    #[serde(default = "default_meta")]
    pub extra: Value,
}

#[derive(Serialize)]
pub struct StyleUpsertResponse {
    pub soul_id: String,
    pub updated_at_ts: i64,
}

/// PUT /api/v1/styles
/// LWW upsert of a soul's style profile.
pub async fn handle_upsert_style(
    State(state): State<AppState>,
    Json(body): Json<StyleUpsertBody>,
) -> Result<(StatusCode, Json<StyleUpsertResponse>), AppError> {
    if body.soul_id.trim().is_empty() {
        return Err(AppError::Validation("soul_id must not be empty".to_string()));
    }
    if body.base_model_ref.trim().is_empty() {
        return Err(AppError::Validation(
            "base_model_ref must not be empty".to_string(),
        ));
    }

    let row = SoulStyleRow {
        soul_id: body.soul_id,
        base_model_ref: body.base_model_ref,
        lora_ids: body.lora_ids,
        palette: body.palette,
        negatives: body.negatives,
        motion_module: body.motion_module,
        extra: body.extra,
        updated_at_ts: now_ms(),
    };
    state.store.upsert_style(&row).await?;

    Ok((
        StatusCode::OK,
        Json(StyleUpsertResponse {
            soul_id: row.soul_id,
            updated_at_ts: row.updated_at_ts,
        }),
    ))
}
