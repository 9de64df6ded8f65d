use chrono::Utc;
use rand::{distr::Alphanumeric, Rng};
use rusqlite::Connection;

use crate::auth::secret_key::hash_secret_key;
use crate::metrics::{ServerMetrics, GAUGE_USERS_REGISTERED};

const UID_LENGTH: usize = 10;

/// A freshly registered account. The secret key is only ever shown here.
#[derive(Debug, Clone)]
pub struct RegisteredAccount {
    pub uid: String,
    pub secret_key: String,
}

fn random_uid() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(UID_LENGTH)
        .map(|c| char::from(c).to_ascii_uppercase())
        .collect()
}

/// Create an account with a random uid and secret key.
///
/// Only the hash of the key is stored. Counts the account in the
/// registered-users gauge once committed.
pub fn register_account(
    conn: &mut Connection,
    metrics: &ServerMetrics,
) -> rusqlite::Result<RegisteredAccount> {
    let tx = conn.transaction()?;

    let uid = loop {
        let candidate = random_uid();
        let taken: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE uid = ?1)",
            [&candidate],
            |row| row.get(0),
        )?;
        if !taken {
            break candidate;
        }
    };

    let key_bytes: [u8; 32] = rand::rng().random();
    let secret_key = hex::encode_upper(key_bytes);
    let now = Utc::now().to_rfc3339();

    tx.execute(
        "INSERT INTO users (uid, last_logged_in, created_at) VALUES (?1, ?2, ?2)",
        rusqlite::params![uid, now],
    )?;
    tx.execute(
        "INSERT INTO auth (hashed_key, user_uid, is_banned) VALUES (?1, ?2, 0)",
        rusqlite::params![hash_secret_key(&secret_key), uid],
    )?;
    tx.commit()?;
    metrics.inc_gauge(GAUGE_USERS_REGISTERED, 1);

    tracing::info!(uid = %uid, "Account registered");
    Ok(RegisteredAccount { uid, secret_key })
}
