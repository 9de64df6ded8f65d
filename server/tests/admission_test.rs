//! Integration tests for session admission over HTTP:
//! POST /auth, GET /auth/renew, bans, temp bans and session exclusivity.

mod common;

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use common::{authenticate, register, serve, test_context, test_context_with, TEST_CONTINENT};
use pairlink_server::auth::jwt::{self, CREDENTIAL_LIFETIME_HOURS};
use pairlink_server::auth::secret_key::{Authenticator, SecretKeyAuthReply};
use pairlink_server::config::AuthConfig;
use pairlink_server::db::DbError;
use pairlink_server::sessions::{SessionError, SessionRegistry};

/// Authenticator whose store is unavailable.
struct BrokenAuthenticator;

#[async_trait]
impl Authenticator for BrokenAuthenticator {
    async fn authorize(&self, _ip: IpAddr, _secret_key: &str) -> Result<SecretKeyAuthReply, DbError> {
        Err(DbError::Poisoned)
    }

    async fn remove_auth(&self, _uid: &str) {}
}

/// Session registry whose backend refuses every call.
struct UnreachableSessions;

fn backend_down() -> SessionError {
    SessionError::Backend(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "session backend unreachable",
    )))
}

#[async_trait]
impl SessionRegistry for UnreachableSessions {
    async fn get(&self, _uid: &str) -> Result<Option<String>, SessionError> {
        Err(backend_down())
    }

    async fn set(&self, _uid: &str, _character_ident: &str, _ttl: Duration) -> Result<(), SessionError> {
        Err(backend_down())
    }

    async fn remove(&self, _uid: &str) -> Result<(), SessionError> {
        Err(backend_down())
    }
}

#[tokio::test]
async fn test_health_check() {
    let ctx = test_context();
    let (base_url, _) = serve(ctx.state.clone()).await;

    let resp = reqwest::get(format!("{}/health", base_url)).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_missing_fields_are_bad_requests() {
    let ctx = test_context();
    let (base_url, _) = serve(ctx.state.clone()).await;

    let (status, body) = authenticate(&base_url, "", "chara-1").await;
    assert_eq!(status, 400);
    assert_eq!(body, "No Authkey");

    let (status, body) = authenticate(&base_url, "some-key", "").await;
    assert_eq!(status, 400);
    assert_eq!(body, "No CharaIdent");
}

#[tokio::test]
async fn test_invalid_key_rejected() {
    let ctx = test_context();
    let (base_url, _) = serve(ctx.state.clone()).await;

    let (status, body) = authenticate(&base_url, "not-a-real-key", "chara-1").await;
    assert_eq!(status, 401);
    assert!(body.contains("secret key is invalid"));
}

#[tokio::test]
async fn test_two_accounts_receive_distinct_credentials() {
    let ctx = test_context();
    let (u1, k1) = register(&ctx.state);
    let (u2, k2) = register(&ctx.state);
    let (base_url, _) = serve(ctx.state.clone()).await;

    let (status, token1) = authenticate(&base_url, &k1, "C1").await;
    assert_eq!(status, 200);
    let (status, token2) = authenticate(&base_url, &k2, "C2").await;
    assert_eq!(status, 200);
    assert_ne!(token1, token2);

    let claims1 = jwt::validate_credential(&ctx.state.jwt_secret, &token1).unwrap();
    assert_eq!(claims1.uid, u1);
    assert_eq!(claims1.character_ident, "C1");
    assert_eq!(claims1.continent, TEST_CONTINENT);

    let claims2 = jwt::validate_credential(&ctx.state.jwt_secret, &token2).unwrap();
    assert_eq!(claims2.uid, u2);

    let expected = chrono::Utc::now().timestamp() + CREDENTIAL_LIFETIME_HOURS * 3600;
    assert!((claims1.exp - expected).abs() < 10);
    assert!((claims2.exp - expected).abs() < 10);
}

#[tokio::test]
async fn test_alias_is_carried_in_credential() {
    let ctx = test_context();
    let (uid, key) = register(&ctx.state);
    common::add_alias(&ctx.state, &uid, "VANITY");
    let (base_url, _) = serve(ctx.state.clone()).await;

    let (status, token) = authenticate(&base_url, &key, "chara-1").await;
    assert_eq!(status, 200);
    let claims = jwt::validate_credential(&ctx.state.jwt_secret, &token).unwrap();
    assert_eq!(claims.alias, "VANITY");
}

#[tokio::test]
async fn test_live_session_blocks_second_login() {
    let ctx = test_context();
    let (uid, key) = register(&ctx.state);
    ctx.state
        .sessions
        .set(&uid, "other-chara", Duration::from_secs(60))
        .await
        .unwrap();
    let (base_url, _) = serve(ctx.state.clone()).await;

    let (status, body) = authenticate(&base_url, &key, "chara-1").await;
    assert_eq!(status, 401);
    assert!(body.starts_with("Already logged in to this account."));
}

#[tokio::test]
async fn test_banned_character_rejected_and_account_flagged() {
    let ctx = test_context();
    let (uid, key) = register(&ctx.state);
    {
        let conn = ctx.state.db.lock().unwrap();
        conn.execute(
            "INSERT INTO banned_users (character_ident, reason, created_at) VALUES ('bad-chara', 'test', 'now')",
            [],
        )
        .unwrap();
    }
    let (base_url, _) = serve(ctx.state.clone()).await;

    let (status, body) = authenticate(&base_url, &key, "bad-chara").await;
    assert_eq!(status, 401);
    assert_eq!(body, "Your character is banned from using the service.");

    let banned: bool = ctx
        .state
        .db
        .lock()
        .unwrap()
        .query_row("SELECT is_banned FROM auth WHERE user_uid = ?1", [&uid], |row| row.get(0))
        .unwrap();
    assert!(banned);
}

#[tokio::test]
async fn test_character_ban_checked_before_key() {
    let ctx = test_context();
    {
        let conn = ctx.state.db.lock().unwrap();
        conn.execute(
            "INSERT INTO banned_users (character_ident, reason, created_at) VALUES ('bad-chara', 'test', 'now')",
            [],
        )
        .unwrap();
    }
    let (base_url, _) = serve(ctx.state.clone()).await;

    let (status, body) = authenticate(&base_url, "wrong-key", "bad-chara").await;
    assert_eq!(status, 401);
    assert_eq!(body, "Your character is banned from using the service.");
}

#[tokio::test]
async fn test_permanent_ban_cascades() {
    let ctx = test_context();
    let (primary, _) = register(&ctx.state);
    let (secondary, key) = register(&ctx.state);
    {
        let conn = ctx.state.db.lock().unwrap();
        conn.execute(
            "UPDATE auth SET is_banned = 1, primary_user_uid = ?1 WHERE user_uid = ?2",
            [&primary, &secondary],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO linked_identities (external_id, hashed_registration_id, user_uid, created_at)
             VALUES (1234, 'REGHASH', ?1, 'now')",
            [&primary],
        )
        .unwrap();
    }
    let (base_url, _) = serve(ctx.state.clone()).await;

    let (status, body) = authenticate(&base_url, &key, "chara-x").await;
    assert_eq!(status, 401);
    assert_eq!(body, "You are permanently banned.");

    let conn = ctx.state.db.lock().unwrap();
    let reason: String = conn
        .query_row(
            "SELECT reason FROM banned_users WHERE character_ident = 'chara-x'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert!(reason.contains(&secondary));

    let mut stmt = conn
        .prepare("SELECT registration_hash FROM banned_registrations ORDER BY registration_hash")
        .unwrap();
    let hashes: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(hashes, vec!["1234".to_string(), "REGHASH".to_string()]);
}

#[tokio::test]
async fn test_temp_ban_after_repeated_failures() {
    let ctx = test_context_with(AuthConfig {
        failed_attempts_for_temp_ban: 3,
        temp_ban_minutes: 7,
        ..AuthConfig::default()
    });
    let (_, key) = register(&ctx.state);
    let (base_url, _) = serve(ctx.state.clone()).await;

    for _ in 0..3 {
        let (status, body) = authenticate(&base_url, "wrong-key", "chara-1").await;
        assert_eq!(status, 401);
        assert!(body.contains("secret key is invalid"));
    }

    // Even the right key is refused while the ban lasts
    let (status, body) = authenticate(&base_url, &key, "chara-1").await;
    assert_eq!(status, 401);
    assert!(body.contains("temporarily banned"));
    assert!(body.contains("7 minutes"));
}

#[tokio::test]
async fn test_renew_issues_fresh_credential() {
    let ctx = test_context();
    let (uid, _) = register(&ctx.state);
    // Held session does not block renewal
    ctx.state
        .sessions
        .set(&uid, "chara-1", Duration::from_secs(60))
        .await
        .unwrap();
    let token =
        jwt::issue_credential(&ctx.state.jwt_secret, &uid, "chara-1", "VANITY", "NA").unwrap();
    let (base_url, _) = serve(ctx.state.clone()).await;

    let resp = reqwest::Client::new()
        .get(format!("{}/auth/renew", base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let renewed = resp.text().await.unwrap();
    let claims = jwt::validate_credential(&ctx.state.jwt_secret, &renewed).unwrap();
    assert_eq!(claims.uid, uid);
    assert_eq!(claims.character_ident, "chara-1");
    assert_eq!(claims.alias, "VANITY");
    assert_eq!(claims.continent, "NA");
}

#[tokio::test]
async fn test_renew_rejects_banned_account() {
    let ctx = test_context();
    let (uid, _) = register(&ctx.state);
    let token = jwt::issue_credential(&ctx.state.jwt_secret, &uid, "chara-1", "", "*").unwrap();
    ctx.state
        .db
        .lock()
        .unwrap()
        .execute("UPDATE auth SET is_banned = 1 WHERE user_uid = ?1", [&uid])
        .unwrap();
    let (base_url, _) = serve(ctx.state.clone()).await;

    let resp = reqwest::Client::new()
        .get(format!("{}/auth/renew", base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(resp.text().await.unwrap(), "You are permanently banned.");

    let banned_ident: bool = ctx
        .state
        .db
        .lock()
        .unwrap()
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM banned_users WHERE character_ident = 'chara-1')",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert!(banned_ident);
}

#[tokio::test]
async fn test_renew_requires_credential() {
    let ctx = test_context();
    let (base_url, _) = serve(ctx.state.clone()).await;

    let resp = reqwest::Client::new()
        .get(format!("{}/auth/renew", base_url))
        .bearer_auth("garbage")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_authenticator_failure_is_generic_unauthorized() {
    let mut ctx = test_context();
    ctx.state.authenticator = Arc::new(BrokenAuthenticator);
    let (base_url, _) = serve(ctx.state.clone()).await;

    let (status, body) = authenticate(&base_url, "some-key", "chara-1").await;
    assert_eq!(status, 401);
    assert_eq!(body, "Unknown internal server error during authentication");
}

#[tokio::test]
async fn test_session_backend_failure_is_generic_unauthorized() {
    let mut ctx = test_context();
    let (_, key) = register(&ctx.state);
    ctx.state.sessions = Arc::new(UnreachableSessions);
    let (base_url, _) = serve(ctx.state.clone()).await;

    let (status, body) = authenticate(&base_url, &key, "chara-1").await;
    assert_eq!(status, 401);
    assert_eq!(body, "Unknown internal server error during authentication");
    assert!(!body.contains("unreachable"));
}

#[tokio::test]
async fn test_renew_store_failure_is_generic_unauthorized() {
    let ctx = test_context();
    let (uid, _) = register(&ctx.state);
    let token = jwt::issue_credential(&ctx.state.jwt_secret, &uid, "chara-1", "", "*").unwrap();
    ctx.state
        .db
        .lock()
        .unwrap()
        .execute("DROP TABLE banned_users", [])
        .unwrap();
    let (base_url, _) = serve(ctx.state.clone()).await;

    let resp = reqwest::Client::new()
        .get(format!("{}/auth/renew", base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body = resp.text().await.unwrap();
    assert_eq!(body, "Unknown error while renewing authentication token");
    assert!(!body.contains("banned_users"));
}

#[tokio::test]
async fn test_renew_rejects_banned_character() {
    let ctx = test_context();
    let (uid, _) = register(&ctx.state);
    let token = jwt::issue_credential(&ctx.state.jwt_secret, &uid, "bad-chara", "", "*").unwrap();
    ctx.state
        .db
        .lock()
        .unwrap()
        .execute(
            "INSERT INTO banned_users (character_ident, reason, created_at) VALUES ('bad-chara', 'test', 'now')",
            [],
        )
        .unwrap();
    let (base_url, _) = serve(ctx.state.clone()).await;

    let resp = reqwest::Client::new()
        .get(format!("{}/auth/renew", base_url))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(
        resp.text().await.unwrap(),
        "Your character is banned from using the service."
    );

    let banned: bool = ctx
        .state
        .db
        .lock()
        .unwrap()
        .query_row("SELECT is_banned FROM auth WHERE user_uid = ?1", [&uid], |row| row.get(0))
        .unwrap();
    assert!(banned);
}
