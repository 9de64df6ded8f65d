//! Session registry: which character identity currently holds each account.
//!
//! Admission reads it to reject a second concurrent session; the WebSocket
//! actor writes it on connect, refreshes it on every ping and clears it on
//! disconnect. Entries carry a TTL so a crashed connection frees the account.

pub mod redis;

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use self::redis::RedisSessionRegistry;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session registry backend error: {0}")]
    Backend(#[from] ::redis::RedisError),
}

#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Live character identity claimed for `uid`, if any.
    async fn get(&self, uid: &str) -> Result<Option<String>, SessionError>;

    /// Claim (or refresh) `uid` for `character_ident` for `ttl`.
    async fn set(&self, uid: &str, character_ident: &str, ttl: Duration) -> Result<(), SessionError>;

    async fn remove(&self, uid: &str) -> Result<(), SessionError>;
}

/// Registry key for an account.
pub fn session_key(uid: &str) -> String {
    format!("UID:{}", uid)
}

#[derive(Debug, Clone)]
struct SessionEntry {
    character_ident: String,
    expires_at: Instant,
}

/// In-process registry. Expired entries are invisible to `get` and are
/// removed by `purge_expired`.
#[derive(Debug, Default)]
pub struct MemorySessionRegistry {
    entries: DashMap<String, SessionEntry>,
}

impl MemorySessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl SessionRegistry for MemorySessionRegistry {
    async fn get(&self, uid: &str) -> Result<Option<String>, SessionError> {
        let key = session_key(uid);
        let live = self
            .entries
            .get(&key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.character_ident.clone());

        if live.is_none() {
            self.entries
                .remove_if(&key, |_, entry| entry.expires_at <= Instant::now());
        }

        Ok(live.filter(|ident| !ident.is_empty()))
    }

    async fn set(&self, uid: &str, character_ident: &str, ttl: Duration) -> Result<(), SessionError> {
        self.entries.insert(
            session_key(uid),
            SessionEntry {
                character_ident: character_ident.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn remove(&self, uid: &str) -> Result<(), SessionError> {
        self.entries.remove(&session_key(uid));
        Ok(())
    }
}

/// Spawn a background task that periodically purges expired sessions.
pub fn spawn_session_sweeper(registry: Arc<MemorySessionRegistry>, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let purged = registry.purge_expired();
            if purged > 0 {
                tracing::debug!("Session sweep: purged {} expired sessions", purged);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let registry = MemorySessionRegistry::new();
        registry
            .set("U1", "chara-1", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(registry.get("U1").await.unwrap().as_deref(), Some("chara-1"));
        assert_eq!(registry.get("U2").await.unwrap(), None);

        registry.remove("U1").await.unwrap();
        assert_eq!(registry.get("U1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entry_is_not_live() {
        let registry = MemorySessionRegistry::new();
        registry
            .set("U1", "chara-1", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(registry.get("U1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let registry = MemorySessionRegistry::new();
        registry
            .set("U1", "chara-1", Duration::from_millis(10))
            .await
            .unwrap();
        registry
            .set("U2", "chara-2", Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(registry.purge_expired(), 1);
        assert!(registry.get("U2").await.unwrap().is_some());
    }
}
