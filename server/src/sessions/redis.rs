use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::time::Duration;

use super::{session_key, SessionError, SessionRegistry};

/// Registry backed by Redis keys with `EX` expiry, shared across server instances.
#[derive(Clone)]
pub struct RedisSessionRegistry {
    manager: ConnectionManager,
}

impl RedisSessionRegistry {
    pub async fn connect(url: &str) -> Result<Self, SessionError> {
        tracing::info!(url = %url, "Connecting to Redis session registry");
        let client = Client::open(url)?;

        // ConnectionManager reconnects on its own
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            e
        })?;

        tracing::info!("Connected to Redis session registry");
        Ok(Self { manager })
    }
}

#[async_trait]
impl SessionRegistry for RedisSessionRegistry {
    async fn get(&self, uid: &str) -> Result<Option<String>, SessionError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(session_key(uid))
            .query_async(&mut conn)
            .await?;
        Ok(value.filter(|ident| !ident.is_empty()))
    }

    async fn set(&self, uid: &str, character_ident: &str, ttl: Duration) -> Result<(), SessionError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("SET")
            .arg(session_key(uid))
            .arg(character_ident)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove(&self, uid: &str) -> Result<(), SessionError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("DEL")
            .arg(session_key(uid))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
