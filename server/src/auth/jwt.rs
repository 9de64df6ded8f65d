use std::path::Path;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;

use crate::auth::middleware::Claims;

/// Lifetime of every issued credential.
pub const CREDENTIAL_LIFETIME_HOURS: i64 = 6;

/// Load or generate the credential signing key (256-bit random secret).
/// Key is stored as raw bytes in data_dir/jwt_secret.
pub fn load_or_generate_jwt_secret(data_dir: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("JWT signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!("JWT key file has wrong size ({}), regenerating", key.len());
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Issue a credential for an admitted session, valid for six hours.
pub fn issue_credential(
    secret: &[u8],
    uid: &str,
    character_ident: &str,
    alias: &str,
    continent: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        uid: uid.to_string(),
        character_ident: character_ident.to_string(),
        alias: alias.to_string(),
        continent: continent.to_string(),
        exp: 0,
    };
    reissue_credential(secret, &claims)
}

/// Sign `claims` again with a fresh expiry; every other claim is kept.
pub fn reissue_credential(secret: &[u8], claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims {
        exp: (Utc::now() + Duration::hours(CREDENTIAL_LIFETIME_HOURS)).timestamp(),
        ..claims.clone()
    };

    encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(secret),
    )
}

/// Validate a credential and return its claims.
pub fn validate_credential(secret: &[u8], token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let token_data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(token_data.claims)
}
