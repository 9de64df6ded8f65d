//! Ban cascade: character identity bans, account bans and the linked
//! registration identities of the primary account.
//!
//! Ban state only grows. All functions take a plain connection so they can run
//! inside whatever blocking section the caller already holds.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::db::models::LinkedIdentity;

/// Check whether `character_ident` is banned.
///
/// When it is, the auth record of `uid` is flagged as banned as well, so an
/// identity ban always ends up as an account ban.
pub fn is_ident_banned(conn: &Connection, uid: &str, character_ident: &str) -> rusqlite::Result<bool> {
    let banned: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM banned_users WHERE character_ident = ?1)",
        [character_ident],
        |row| row.get(0),
    )?;

    if banned {
        let flagged = conn.execute(
            "UPDATE auth SET is_banned = 1 WHERE user_uid = ?1 AND is_banned = 0",
            [uid],
        )?;
        if flagged > 0 {
            tracing::info!(uid = %uid, ident = %character_ident, "Flagged account of banned character");
        }
    }

    Ok(banned)
}

/// True if the account itself, or any secondary account pointing at it, is banned.
pub fn is_account_banned(conn: &Connection, uid: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM auth
             WHERE (user_uid = ?1 OR primary_user_uid = ?1) AND is_banned = 1
         )",
        [uid],
        |row| row.get(0),
    )
}

/// Persist a ban for `character_ident` and every registration identity linked
/// to the primary account of `uid`. Idempotent; commits before returning.
pub fn ensure_ban(conn: &mut Connection, uid: &str, character_ident: &str) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;

    if !character_ident.is_empty() {
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO banned_users (character_ident, reason, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                character_ident,
                format!("Autobanned CharacterIdent ({})", uid),
                Utc::now().to_rfc3339(),
            ],
        )?;
        if inserted > 0 {
            tracing::warn!(uid = %uid, ident = %character_ident, "Character identity banned");
        }
    }

    let primary_uid = primary_account(&tx, uid)?;

    if let Some(linked) = linked_identity(&tx, &primary_uid)? {
        let mut hashes = vec![linked.external_id.to_string()];
        if let Some(hashed) = linked.hashed_registration_id {
            hashes.push(hashed);
        }
        for hash in hashes {
            tx.execute(
                "INSERT OR IGNORE INTO banned_registrations (registration_hash) VALUES (?1)",
                [&hash],
            )?;
        }
        tracing::warn!(
            uid = %uid,
            primary_uid = %primary_uid,
            external_id = linked.external_id,
            "Linked registration banned"
        );
    }

    tx.commit()
}

/// Resolve the primary account of a secondary account; a primary resolves to itself.
fn primary_account(conn: &Connection, uid: &str) -> rusqlite::Result<String> {
    let primary: Option<Option<String>> = conn
        .query_row(
            "SELECT primary_user_uid FROM auth WHERE user_uid = ?1",
            [uid],
            |row| row.get(0),
        )
        .optional()?;

    Ok(primary.flatten().unwrap_or_else(|| uid.to_string()))
}

fn linked_identity(conn: &Connection, uid: &str) -> rusqlite::Result<Option<LinkedIdentity>> {
    conn.query_row(
        "SELECT external_id, hashed_registration_id, user_uid FROM linked_identities WHERE user_uid = ?1",
        [uid],
        |row| {
            Ok(LinkedIdentity {
                external_id: row.get(0)?,
                hashed_registration_id: row.get(1)?,
                user_uid: row.get(2)?,
            })
        },
    )
    .optional()
}
