//! Shared harness for the integration tests: builds a full AppState on a
//! temporary data directory and can serve it on an ephemeral port.

#![allow(dead_code)]

use axum::extract::ws::Message;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use pairlink_server::auth::geo::StaticGeoLookup;
use pairlink_server::auth::secret_key::SecretKeyAuthenticator;
use pairlink_server::config::AuthConfig;
use pairlink_server::metrics::ServerMetrics;
use pairlink_server::sessions::MemorySessionRegistry;
use pairlink_server::state::AppState;
use pairlink_server::ws::protocol::ServerEvent;

pub const TEST_CONTINENT: &str = "EU";

pub struct TestContext {
    pub state: AppState,
    // Keep the temp dir alive so the data directory isn't deleted
    _tmp_dir: tempfile::TempDir,
}

/// Build application state backed by a fresh database.
pub fn test_context() -> TestContext {
    test_context_with(AuthConfig::default())
}

pub fn test_context_with(auth: AuthConfig) -> TestContext {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = pairlink_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = pairlink_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");
    let metrics = Arc::new(ServerMetrics::new().expect("Failed to build metrics"));

    let temp_ban_minutes = auth.temp_ban_minutes;
    let state = AppState {
        db: db.clone(),
        jwt_secret,
        connections: pairlink_server::ws::new_connection_registry(),
        sessions: Arc::new(MemorySessionRegistry::new()),
        authenticator: Arc::new(SecretKeyAuthenticator::new(db, auth, metrics.clone())),
        geo: Arc::new(StaticGeoLookup::new(TEST_CONTINENT)),
        metrics,
        session_ttl: Duration::from_secs(60),
        temp_ban_minutes,
        delete_poll_interval: Duration::from_millis(20),
    };

    TestContext {
        state,
        _tmp_dir: tmp_dir,
    }
}

/// Register an account and return (uid, secret key).
pub fn register(state: &AppState) -> (String, String) {
    let mut conn = state.db.lock().unwrap();
    let account = pairlink_server::accounts::register_account(&mut conn, &state.metrics).unwrap();
    (account.uid, account.secret_key)
}

/// Mark an account online with the given character identity.
pub fn set_ident(state: &AppState, uid: &str, ident: &str) {
    let conn = state.db.lock().unwrap();
    conn.execute(
        "UPDATE users SET character_ident = ?2 WHERE uid = ?1",
        [uid, ident],
    )
    .unwrap();
}

pub fn add_alias(state: &AppState, uid: &str, alias: &str) {
    let conn = state.db.lock().unwrap();
    conn.execute(
        "INSERT INTO aliases (alias_uid, user_uid) VALUES (?1, ?2)",
        [alias, uid],
    )
    .unwrap();
}

/// Attach a fake connection for `uid` and return its receiving end.
pub fn capture(state: &AppState, uid: &str) -> mpsc::UnboundedReceiver<Message> {
    let (tx, rx) = mpsc::unbounded_channel();
    state
        .connections
        .entry(uid.to_string())
        .or_default()
        .push(tx);
    rx
}

/// Every event queued so far on a captured connection.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        if let Message::Text(text) = msg {
            events.push(serde_json::from_str(text.as_str()).expect("Invalid event frame"));
        }
    }
    events
}

/// Serve the router on an ephemeral port and return the base URL.
pub async fn serve(state: AppState) -> (String, SocketAddr) {
    let app = pairlink_server::routes::build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (format!("http://{}", addr), addr)
}

/// POST /auth and return (status, body).
pub async fn authenticate(base_url: &str, secret_key: &str, chara_ident: &str) -> (u16, String) {
    let resp = reqwest::Client::new()
        .post(format!("{}/auth", base_url))
        .form(&[("auth", secret_key), ("charaIdent", chara_ident)])
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.text().await.unwrap())
}
