//! Display-format normalization.
//!
//! Providers answer in whatever encoding they like; everything persisted to
//! the object store goes through the transcoder first so asset references
//! always point at one predictable format.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;

use crate::render::Artifact;

#[derive(Debug, Clone)]
pub struct DisplayAsset {
    pub bytes: Bytes,
    pub content_type: &'static str,
    pub extension: &'static str,
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn to_display_format(&self, artifact: &Artifact) -> Result<DisplayAsset>;
}

/// Re-encodes any decodable artifact as PNG.
pub struct PngTranscoder;

#[async_trait]
impl Transcoder for PngTranscoder {
    async fn to_display_format(&self, artifact: &Artifact) -> Result<DisplayAsset> {
        if artifact.mime == "image/png" {
            // Already in display format, pass through untouched.
            return Ok(DisplayAsset {
                bytes: artifact.bytes.clone(),
                content_type: "image/png",
                extension: "png",
            });
        }

        let decoded = image::load_from_memory(&artifact.bytes)
            .context("failed to decode artifact for transcoding")?;
        let mut encoded = std::io::Cursor::new(Vec::new());
        decoded
            .write_to(&mut encoded, image::ImageOutputFormat::Png)
            .context("failed to encode display PNG")?;

        Ok(DisplayAsset {
            bytes: Bytes::from(encoded.into_inner()),
            content_type: "image/png",
            extension: "png",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, Luma};

    fn artifact(format: image::ImageOutputFormat, mime: &str) -> Artifact {
        let img = DynamicImage::ImageLuma8(GrayImage::from_fn(16, 16, |x, y| {
            Luma([(x * 16 + y) as u8])
        }));
        let mut buffer = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buffer, format).unwrap();
        Artifact {
            bytes: Bytes::from(buffer.into_inner()),
            mime: mime.to_string(),
            width: 16,
            height: 16,
        }
    }

    #[tokio::test]
    async fn test_png_passes_through() {
        let input = artifact(image::ImageOutputFormat::Png, "image/png");
        let asset = PngTranscoder.to_display_format(&input).await.unwrap();
        assert_eq!(asset.bytes, input.bytes);
        assert_eq!(asset.extension, "png");
    }

    #[tokio::test]
    async fn test_jpeg_is_reencoded_as_png() {
        let input = artifact(image::ImageOutputFormat::Jpeg(90), "image/jpeg");
        let asset = PngTranscoder.to_display_format(&input).await.unwrap();
        assert_eq!(asset.content_type, "image/png");
        let reloaded = image::load_from_memory(&asset.bytes).unwrap();
        assert_eq!(reloaded.width(), 16);
    }

    #[tokio::test]
    async fn test_undecodable_artifact_errors() {
        let input = Artifact {
            bytes: Bytes::from_static(b"garbage"),
            mime: "image/jpeg".to_string(),
            width: 0,
            height: 0,
        };
        assert!(PngTranscoder.to_display_format(&input).await.is_err());
    }
}
