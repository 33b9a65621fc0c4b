//! Object storage boundary. References returned by `put` are opaque to the
//! engine; nothing downstream parses them.

use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tracing::info;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Uploads the bytes and returns an opaque asset reference. The engine
    /// persists catalog rows only after this returns successfully.
    async fn put(&self, bytes: Bytes, path_hint: &str, content_type: &str) -> Result<String>;
}

pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, bytes: Bytes, path_hint: &str, content_type: &str) -> Result<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path_hint)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("S3 upload failed: {e}"))?;

        info!("Uploaded asset to s3://{}/{}", self.bucket, path_hint);
        Ok(format!("s3://{}/{}", self.bucket, path_hint))
    }
}

/// Test double that keeps uploads in memory.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: tokio::sync::Mutex<std::collections::HashMap<String, Bytes>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)]
    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bytes: Bytes, path_hint: &str, _content_type: &str) -> Result<String> {
        let mut objects = self.objects.lock().await;
        objects.insert(path_hint.to_string(), bytes);
        Ok(format!("mem://{path_hint}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_returns_opaque_reference() {
        let store = MemoryObjectStore::new();
        let reference = store
            .put(Bytes::from_static(b"png"), "soul/nova/a.png", "image/png")
            .await
            .unwrap();
        assert_eq!(reference, "mem://soul/nova/a.png");
        assert_eq!(store.len().await, 1);
    }
}
