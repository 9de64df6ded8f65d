//! Session admission: trades a secret key for a short-lived credential.
//!
//! Every failure is answered with a plain-text reason. Unexpected failures are
//! logged with full detail and reduced to a generic message at the boundary.

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Form,
};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};

use crate::auth::jwt;
use crate::auth::middleware::Claims;
use crate::db::{run_blocking, DbError};
use crate::moderation::ban;
use crate::sessions::SessionError;
use crate::state::AppState;

const CHARACTER_BANNED: &str = "Your character is banned from using the service.";
const INVALID_KEY: &str =
    "The provided secret key is invalid. Verify your account's existence and/or recover the secret key.";
const PERMANENTLY_BANNED: &str = "You are permanently banned.";
const ALREADY_LOGGED_IN: &str =
    "Already logged in to this account. Reconnect in 60 seconds. If you keep seeing this issue, restart your game.";
const AUTHENTICATE_UNKNOWN: &str = "Unknown internal server error during authentication";
const RENEW_UNKNOWN: &str = "Unknown error while renewing authentication token";

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("internal admission failure: {0}")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl From<DbError> for AdmissionError {
    fn from(err: DbError) -> Self {
        AdmissionError::Internal(Box::new(err))
    }
}

impl From<SessionError> for AdmissionError {
    fn from(err: SessionError) -> Self {
        AdmissionError::Internal(Box::new(err))
    }
}

impl From<jsonwebtoken::errors::Error> for AdmissionError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AdmissionError::Internal(Box::new(err))
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        match self {
            AdmissionError::BadRequest(reason) => (StatusCode::BAD_REQUEST, reason).into_response(),
            AdmissionError::Unauthorized(reason) => (StatusCode::UNAUTHORIZED, reason).into_response(),
            // Detail is logged by `authenticate`/`renew` and never sent to the caller
            AdmissionError::Internal(_) => {
                (StatusCode::UNAUTHORIZED, AUTHENTICATE_UNKNOWN.to_string()).into_response()
            }
        }
    }
}

fn unauthorized(reason: &str) -> AdmissionError {
    AdmissionError::Unauthorized(reason.to_string())
}

fn temp_ban_message(minutes: i64) -> String {
    format!(
        "Due to an excessive amount of failed authentication attempts you are temporarily banned. \
         Check your Secret Key configuration and try connecting again in {} minutes.",
        minutes
    )
}

/// Authenticate(secretKey, characterIdentity) -> credential.
pub async fn authenticate(
    state: &AppState,
    ip: IpAddr,
    secret_key: &str,
    character_ident: &str,
) -> Result<String, AdmissionError> {
    match try_authenticate(state, ip, secret_key, character_ident).await {
        Err(AdmissionError::Internal(err)) => {
            tracing::warn!(ident = %character_ident, error = %err, "Authenticate:UNKNOWN");
            Err(unauthorized(AUTHENTICATE_UNKNOWN))
        }
        other => other,
    }
}

async fn try_authenticate(
    state: &AppState,
    ip: IpAddr,
    secret_key: &str,
    character_ident: &str,
) -> Result<String, AdmissionError> {
    if secret_key.is_empty() {
        return Err(AdmissionError::BadRequest("No Authkey".to_string()));
    }
    if character_ident.is_empty() {
        return Err(AdmissionError::BadRequest("No CharaIdent".to_string()));
    }

    let reply = state.authenticator.authorize(ip, secret_key).await?;
    let uid = reply.uid.clone().unwrap_or_default();

    let ident_banned = {
        let uid = uid.clone();
        let ident = character_ident.to_string();
        run_blocking(&state.db, move |conn| ban::is_ident_banned(conn, &uid, &ident)).await?
    };
    if ident_banned {
        tracing::warn!(uid = %uid, ident = %character_ident, "Authenticate:IDENTBAN");
        return Err(unauthorized(CHARACTER_BANNED));
    }

    if !reply.success && !reply.temp_ban {
        tracing::warn!(uid = %reply.uid.as_deref().unwrap_or("NOUID"), ident = %character_ident, "Authenticate:INVALID");
        return Err(unauthorized(INVALID_KEY));
    }

    if !reply.success && reply.temp_ban {
        tracing::warn!(uid = %reply.uid.as_deref().unwrap_or("NOUID"), ident = %character_ident, "Authenticate:TEMPBAN");
        return Err(AdmissionError::Unauthorized(temp_ban_message(state.temp_ban_minutes)));
    }

    if reply.perma_ban {
        let ban_uid = uid.clone();
        let ident = character_ident.to_string();
        run_blocking(&state.db, move |conn| ban::ensure_ban(conn, &ban_uid, &ident)).await?;
        tracing::warn!(uid = %uid, ident = %character_ident, "Authenticate:UIDBAN");
        return Err(unauthorized(PERMANENTLY_BANNED));
    }

    // Check-then-issue without a lock; the registry TTL bounds the race
    if state.sessions.get(&uid).await?.is_some() {
        tracing::warn!(uid = %uid, ident = %character_ident, "Authenticate:DUPLICATE");
        return Err(unauthorized(ALREADY_LOGGED_IN));
    }

    let continent = state.geo.continent_for(ip).await;
    let alias = reply.alias.unwrap_or_default();
    let token = jwt::issue_credential(&state.jwt_secret, &uid, character_ident, &alias, &continent)?;

    tracing::info!(uid = %uid, ident = %character_ident, continent = %continent, "Authenticate:SUCCESS");
    Ok(token)
}

/// Renew(existingCredential) -> credential with a fresh expiry.
pub async fn renew(state: &AppState, claims: &Claims) -> Result<String, AdmissionError> {
    match try_renew(state, claims).await {
        Err(AdmissionError::Internal(err)) => {
            tracing::warn!(uid = %claims.uid, ident = %claims.character_ident, error = %err, "RenewToken:FAILURE");
            Err(unauthorized(RENEW_UNKNOWN))
        }
        other => other,
    }
}

async fn try_renew(state: &AppState, claims: &Claims) -> Result<String, AdmissionError> {
    let uid = claims.uid.clone();
    let ident = claims.character_ident.clone();

    let account_banned = run_blocking(&state.db, move |conn| {
        if ban::is_account_banned(conn, &uid)? {
            ban::ensure_ban(conn, &uid, &ident)?;
            return Ok(true);
        }
        Ok(false)
    })
    .await?;
    if account_banned {
        tracing::warn!(uid = %claims.uid, ident = %claims.character_ident, "RenewToken:FAILURE");
        return Err(unauthorized(PERMANENTLY_BANNED));
    }

    let uid = claims.uid.clone();
    let ident = claims.character_ident.clone();
    let ident_banned =
        run_blocking(&state.db, move |conn| ban::is_ident_banned(conn, &uid, &ident)).await?;
    if ident_banned {
        tracing::warn!(uid = %claims.uid, ident = %claims.character_ident, "RenewToken:FAILURE");
        return Err(unauthorized(CHARACTER_BANNED));
    }

    let token = jwt::reissue_credential(&state.jwt_secret, claims)?;
    tracing::info!(uid = %claims.uid, ident = %claims.character_ident, "RenewToken:SUCCESS");
    Ok(token)
}

/// Form body of POST /auth.
#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    #[serde(default)]
    pub auth: String,
    #[serde(default, rename = "charaIdent")]
    pub chara_ident: String,
}

/// Caller address: first `X-Forwarded-For` entry, else the socket peer.
pub fn caller_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
        .unwrap_or_else(|| peer.ip())
}

/// POST /auth
pub async fn create_credential(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Form(req): Form<AuthRequest>,
) -> Result<String, AdmissionError> {
    let ip = caller_ip(&headers, peer);
    authenticate(&state, ip, &req.auth, &req.chara_ident).await
}

/// GET /auth/renew
pub async fn renew_credential(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<String, AdmissionError> {
    renew(&state, &claims).await
}
