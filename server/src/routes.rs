use axum::{extract::State, http::header, middleware, response::IntoResponse, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::auth::admission;
use crate::auth::middleware::JwtSecret;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the credential secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    State(state): State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting on admission: one token every 3 seconds, burst of 20, per IP.
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(3)
            .burst_size(20)
            .finish()
            .expect("Failed to build governor config"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    let auth_routes = Router::new()
        .route("/auth", axum::routing::post(admission::create_credential))
        .layer(GovernorLayer {
            config: governor_config,
        });

    // Renewal requires a valid credential (Claims extractor validates it)
    let authenticated_routes = Router::new().route(
        "/auth/renew",
        axum::routing::get(admission::renew_credential),
    );

    // WebSocket endpoint (auth via query param, not header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    let public_routes = Router::new()
        .route("/health", axum::routing::get(health_check))
        .route("/metrics", axum::routing::get(metrics_export));

    Router::new()
        .merge(auth_routes)
        .merge(authenticated_routes)
        .merge(ws_routes)
        .merge(public_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// Prometheus text exposition of the server metrics
async fn metrics_export(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
