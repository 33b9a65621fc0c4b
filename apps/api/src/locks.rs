//! Best-effort work locks with TTL semantics.
//!
//! This is deliberately NOT a correctness-critical distributed lock. It only
//! reduces the chance of two workers generating for the same (soul, cue) at
//! once; races that slip through are resolved by the dedup guard and LWW
//! appends. TTL expiry, not explicit release, is the correctness backstop —
//! a crashed holder's lock simply ages out.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::lww::now_ms;

/// Lock key for a (soul, normalized cue) pair.
pub fn lock_key(soul_id: &str, key_norm: &str) -> String {
    format!("{soul_id}|{key_norm}")
}

#[async_trait]
pub trait LockManager: Send + Sync {
    /// Non-blocking acquisition. False means someone else holds an unexpired
    /// lock — callers are expected to proceed anyway.
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool>;

    /// Releases only if `owner` still holds the lock. Best-effort; errors are
    /// for the caller to log, never to fail a request on.
    async fn release(&self, key: &str, owner: &str) -> Result<()>;
}

/// Redis-backed lock: `SET key owner NX PX ttl`. Expiry is handled by Redis
/// itself, so an abandoned lock self-heals without any sweeper.
pub struct RedisLockManager {
    client: redis::Client,
}

impl RedisLockManager {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LockManager for RedisLockManager {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn release(&self, key: &str, owner: &str) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        // Read-then-delete is racy around expiry; acceptable for a lock whose
        // loss only risks duplicate work.
        let holder: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        if holder.as_deref() == Some(owner) {
            redis::cmd("DEL")
                .arg(key)
                .query_async::<_, ()>(&mut conn)
                .await?;
        }
        Ok(())
    }
}

/// In-process lock table for tests, honoring the same TTL semantics.
#[derive(Default)]
pub struct MemoryLockManager {
    held: Mutex<HashMap<String, (String, i64)>>,
}

impl MemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockManager for MemoryLockManager {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let mut held = self.held.lock().await;
        let now = now_ms();
        match held.get(key) {
            Some((_, expires_at)) if *expires_at > now => Ok(false),
            _ => {
                held.insert(
                    key.to_string(),
                    (owner.to_string(), now + ttl.as_millis() as i64),
                );
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str, owner: &str) -> Result<()> {
        let mut held = self.held.lock().await;
        if held.get(key).is_some_and(|(holder, _)| holder == owner) {
            held.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_then_contend() {
        let locks = MemoryLockManager::new();
        let ttl = Duration::from_secs(60);
        assert!(locks.try_acquire("nova|penguin", "w1", ttl).await.unwrap());
        assert!(!locks.try_acquire("nova|penguin", "w2", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_frees_for_next_owner() {
        let locks = MemoryLockManager::new();
        let ttl = Duration::from_secs(60);
        locks.try_acquire("k", "w1", ttl).await.unwrap();
        locks.release("k", "w1").await.unwrap();
        assert!(locks.try_acquire("k", "w2", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_by_non_owner_is_ignored() {
        let locks = MemoryLockManager::new();
        let ttl = Duration::from_secs(60);
        locks.try_acquire("k", "w1", ttl).await.unwrap();
        locks.release("k", "intruder").await.unwrap();
        assert!(!locks.try_acquire("k", "w2", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lock_self_heals() {
        let locks = MemoryLockManager::new();
        locks
            .try_acquire("k", "crashed", Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(locks
            .try_acquire("k", "w2", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[test]
    fn test_lock_key_format() {
        assert_eq!(lock_key("nova", "ice penguin"), "nova|ice penguin");
    }
}
