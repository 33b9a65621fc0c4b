use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use crate::lww::LwwStamped;

/// Style parameters for a soul: base model, LoRAs, palette, negative prompts.
/// Owned by the style registry; this core reads it and passes upserts through.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SoulStyleRow {
    pub soul_id: String,
    pub base_model_ref: String,
    pub lora_ids: Vec<String>,
    pub palette: Value,
    pub negatives: Vec<String>,
    pub motion_module: Option<String>,
    pub extra: Value,
    pub updated_at_ts: i64,
}

impl SoulStyleRow {
    /// Derives the fixed style tokens appended to every normalized cue and
    /// composed prompt for this soul. LoRA ids like `anime_style@v1` become
    /// `anime style`; the palette and motion module each contribute one token.
    pub fn style_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self
            .lora_ids
            .iter()
            .map(|lora_id| {
                lora_id
                    .split('@')
                    .next()
                    .unwrap_or(lora_id)
                    .replace('_', " ")
            })
            .collect();

        if let Some(primary) = self.palette.get("primary").and_then(|v| v.as_str()) {
            if primary.to_lowercase().contains("pastel") {
                tokens.push("pastel colors".to_string());
            } else {
                tokens.push("elegant colors".to_string());
            }
        }

        if let Some(motion) = &self.motion_module {
            if motion.to_lowercase().contains("animate") {
                tokens.push("animated style".to_string());
            } else {
                tokens.push("static style".to_string());
            }
        }

        tokens
    }
}

impl LwwStamped for SoulStyleRow {
    type Id = String;

    fn lww_id(&self) -> String {
        self.soul_id.clone()
    }
    fn lww_ts(&self) -> i64 {
        self.updated_at_ts
    }
}
