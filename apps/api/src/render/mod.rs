//! Generation provider boundary — the single point of entry for all
//! text-to-image calls.
//!
//! The provider is a black box behind `RenderProvider`; the engine only needs
//! `render(style, prompt, seed) -> artifact`, invocable with a fresh seed on
//! retry, with timeout distinguishable from failure.

pub mod transcode;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::soul::SoulStyleRow;
use crate::prompt::builder::ComposedPrompt;

const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("render timed out")]
    Timeout,

    #[error("provider returned an empty artifact")]
    EmptyArtifact,

    #[error("rate limited after {retries} retries")]
    RateLimited { retries: u32 },
}

impl RenderError {
    pub fn is_timeout(&self) -> bool {
        match self {
            RenderError::Timeout => true,
            RenderError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// A generated artifact as returned by the provider, before transcoding.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Bytes,
    pub mime: String,
    pub width: u32,
    pub height: u32,
}

#[async_trait]
pub trait RenderProvider: Send + Sync {
    async fn render(
        &self,
        style: &SoulStyleRow,
        prompt: &ComposedPrompt,
        seed: u32,
    ) -> Result<Artifact, RenderError>;
}

#[derive(Debug, Serialize)]
struct RenderRequestBody<'a> {
    model: &'a str,
    loras: &'a [String],
    prompt: &'a str,
    negative_prompt: &'a str,
    seed: u32,
}

#[derive(Debug, Deserialize)]
struct RenderResponseBody {
    image_url: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
    #[serde(default)]
    content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    error: ProviderErrorBody,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    message: String,
}

/// HTTP diffusion-server client. Retries 429s and 5xx responses with
/// exponential backoff; the artifact itself is fetched from the URL the
/// provider hands back.
pub struct HttpRenderProvider {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpRenderProvider {
    pub fn new(endpoint: String, api_key: String, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to build HTTP client"),
            endpoint,
            api_key,
        }
    }

    async fn submit(
        &self,
        body: &RenderRequestBody<'_>,
    ) -> Result<RenderResponseBody, RenderError> {
        let mut last_error: Option<RenderError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s
                let delay = Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "Render attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&self.endpoint)
                .header("x-api-key", &self.api_key)
                .json(body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) if e.is_timeout() => return Err(RenderError::Timeout),
                Err(e) => {
                    last_error = Some(RenderError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let message = response.text().await.unwrap_or_default();
                warn!("Render provider returned {status}: {message}");
                last_error = Some(RenderError::Api {
                    status: status.as_u16(),
                    message,
                });
                continue;
            }

            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ProviderError>(&message)
                    .map(|e| e.error.message)
                    .unwrap_or(message);
                return Err(RenderError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            return Ok(response.json().await?);
        }

        Err(last_error.unwrap_or(RenderError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }

    async fn download(&self, url: &str) -> Result<(Bytes, String), RenderError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                RenderError::Timeout
            } else {
                RenderError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RenderError::Api {
                status: status.as_u16(),
                message: format!("artifact download failed from {url}"),
            });
        }

        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let bytes = response.bytes().await?;
        Ok((bytes, mime))
    }
}

#[async_trait]
impl RenderProvider for HttpRenderProvider {
    async fn render(
        &self,
        style: &SoulStyleRow,
        prompt: &ComposedPrompt,
        seed: u32,
    ) -> Result<Artifact, RenderError> {
        let body = RenderRequestBody {
            model: &style.base_model_ref,
            loras: &style.lora_ids,
            prompt: &prompt.positive,
            negative_prompt: &prompt.negative,
            seed,
        };

        let submitted = self.submit(&body).await?;
        let (bytes, mime) = self.download(&submitted.image_url).await?;
        if bytes.is_empty() {
            return Err(RenderError::EmptyArtifact);
        }

        debug!(
            "Rendered {}x{} artifact ({} bytes) with seed {seed}",
            submitted.width,
            submitted.height,
            bytes.len()
        );

        Ok(Artifact {
            bytes,
            mime: submitted.content_type.unwrap_or(mime),
            width: submitted.width,
            height: submitted.height,
        })
    }
}
