//! Secret key authentication.
//!
//! Keys are stored only as upper-case hex SHA-256 hashes. Repeated failures
//! from one IP lead to a temporary ban; successful lookups are cached briefly.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rusqlite::OptionalExtension;
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::sync::Arc;

use crate::config::AuthConfig;
use crate::db::models::AuthRecord;
use crate::db::{run_blocking, DbError, DbPool};
use crate::metrics::{ServerMetrics, COUNTER_AUTHENTICATION_FAILURES, COUNTER_AUTHENTICATION_SUCCESSES};

/// Outcome of a secret key check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretKeyAuthReply {
    pub success: bool,
    pub uid: Option<String>,
    pub alias: Option<String>,
    pub temp_ban: bool,
    pub perma_ban: bool,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authorize(&self, ip: IpAddr, secret_key: &str) -> Result<SecretKeyAuthReply, DbError>;

    /// Forget any admission state held for `uid`.
    async fn remove_auth(&self, uid: &str);
}

/// Upper-case hex SHA-256 of a secret key, as stored in the auth table.
pub fn hash_secret_key(secret_key: &str) -> String {
    hex::encode_upper(Sha256::digest(secret_key.as_bytes()))
}

#[derive(Debug, Clone)]
struct FailedAuthorization {
    attempts: u32,
    last_failure: DateTime<Utc>,
    banned_until: Option<DateTime<Utc>>,
}

impl FailedAuthorization {
    /// Still worth keeping at `now`: banned, or failed within `window`.
    fn is_live(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.banned_until {
            Some(until) => until > now,
            None => self.last_failure + window > now,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedReply {
    reply: SecretKeyAuthReply,
    expires_at: DateTime<Utc>,
}

pub struct SecretKeyAuthenticator {
    db: DbPool,
    settings: AuthConfig,
    metrics: Arc<ServerMetrics>,
    /// ip -> failure record
    failed: DashMap<IpAddr, FailedAuthorization>,
    /// hashed key -> recent positive reply
    cached: DashMap<String, CachedReply>,
}

impl SecretKeyAuthenticator {
    pub fn new(db: DbPool, settings: AuthConfig, metrics: Arc<ServerMetrics>) -> Self {
        Self {
            db,
            settings,
            metrics,
            failed: DashMap::new(),
            cached: DashMap::new(),
        }
    }

    fn is_whitelisted(&self, ip: IpAddr) -> bool {
        self.settings
            .whitelisted_ips
            .iter()
            .any(|entry| entry.parse::<IpAddr>().map(|w| w == ip).unwrap_or(false))
    }

    /// True while `ip` is serving a temporary ban. Starts the ban when the
    /// failure threshold has just been reached. Expired bans and stale
    /// failure records are dropped.
    fn is_temp_banned(&self, ip: IpAddr) -> bool {
        if self.is_whitelisted(ip) {
            return false;
        }

        let now = Utc::now();
        let window = self.ban_window();
        let mut expired = false;
        let banned = match self.failed.get_mut(&ip) {
            Some(entry) if !entry.is_live(now, window) => {
                expired = true;
                false
            }
            Some(mut entry) if entry.attempts >= self.settings.failed_attempts_for_temp_ban => {
                let until = *entry.banned_until.get_or_insert(now + window);
                expired = until <= now;
                !expired
            }
            _ => false,
        };

        if expired {
            self.failed.remove(&ip);
        }
        banned
    }

    fn ban_window(&self) -> Duration {
        Duration::minutes(self.settings.temp_ban_minutes)
    }

    fn record_failure(&self, ip: IpAddr) -> SecretKeyAuthReply {
        let now = Utc::now();
        let attempts = {
            let mut entry = self.failed.entry(ip).or_insert(FailedAuthorization {
                attempts: 0,
                last_failure: now,
                banned_until: None,
            });
            // Failures older than the ban window no longer count
            if !entry.is_live(now, self.ban_window()) {
                entry.attempts = 0;
                entry.banned_until = None;
            }
            entry.attempts += 1;
            entry.last_failure = now;
            entry.attempts
        };

        self.metrics.increase_counter(COUNTER_AUTHENTICATION_FAILURES, 1);
        tracing::warn!(ip = %ip, attempts = attempts, "Failed secret key authorization");

        SecretKeyAuthReply::default()
    }

    /// Drop expired bans, stale failure records and cached replies.
    pub fn purge_expired(&self) {
        let now = Utc::now();
        let window = self.ban_window();
        self.failed.retain(|_, entry| entry.is_live(now, window));
        self.cached.retain(|_, entry| entry.expires_at > now);
    }
}

#[async_trait]
impl Authenticator for SecretKeyAuthenticator {
    async fn authorize(&self, ip: IpAddr, secret_key: &str) -> Result<SecretKeyAuthReply, DbError> {
        if self.is_temp_banned(ip) {
            tracing::warn!(ip = %ip, "Authorization attempt during temporary ban");
            return Ok(SecretKeyAuthReply {
                temp_ban: true,
                ..Default::default()
            });
        }

        let hashed_key = hash_secret_key(secret_key);

        if let Some(cached) = self.cached.get(&hashed_key) {
            if cached.expires_at > Utc::now() {
                self.metrics.increase_counter(COUNTER_AUTHENTICATION_SUCCESSES, 1);
                return Ok(cached.reply.clone());
            }
        }

        let lookup_key = hashed_key.clone();
        let record = run_blocking(&self.db, move |conn| {
            conn.query_row(
                "SELECT a.user_uid, a.is_banned, a.primary_user_uid,
                        (SELECT MIN(alias_uid) FROM aliases WHERE user_uid = a.user_uid)
                 FROM auth a WHERE a.hashed_key = ?1",
                [&lookup_key],
                |row| {
                    Ok(AuthRecord {
                        user_uid: row.get(0)?,
                        is_banned: row.get(1)?,
                        primary_user_uid: row.get(2)?,
                        alias: row.get(3)?,
                    })
                },
            )
            .optional()
        })
        .await?;

        let Some(record) = record else {
            return Ok(self.record_failure(ip));
        };

        self.failed.remove(&ip);

        let reply = SecretKeyAuthReply {
            success: true,
            uid: Some(record.user_uid),
            alias: record.alias,
            temp_ban: false,
            perma_ban: record.is_banned,
        };

        self.cached.insert(
            hashed_key,
            CachedReply {
                reply: reply.clone(),
                expires_at: Utc::now() + Duration::seconds(self.settings.positive_cache_secs),
            },
        );
        self.metrics.increase_counter(COUNTER_AUTHENTICATION_SUCCESSES, 1);
        tracing::debug!(
            uid = ?reply.uid,
            primary_uid = ?record.primary_user_uid,
            "Secret key authorized"
        );

        Ok(reply)
    }

    async fn remove_auth(&self, uid: &str) {
        self.cached
            .retain(|_, entry| entry.reply.uid.as_deref() != Some(uid));
        tracing::info!(uid = %uid, "Removed cached admission state");
    }
}
