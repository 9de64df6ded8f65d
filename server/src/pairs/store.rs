//! SQL for the pair graph. Plain functions over a borrowed connection; the
//! engine decides which of them share one blocking section.

use rusqlite::{Connection, OptionalExtension};

use super::ClientPairDto;
use crate::db::models::ClientPair;

pub fn user_exists(conn: &Connection, uid: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE uid = ?1)",
        [uid],
        |row| row.get(0),
    )
}

/// Current character identity, or `None` if the account does not exist.
pub fn character_ident(conn: &Connection, uid: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT character_ident FROM users WHERE uid = ?1",
        [uid],
        |row| row.get(0),
    )
    .optional()
}

/// Resolve a raw uid or a vanity alias to an existing account uid.
pub fn resolve_identifier(conn: &Connection, identifier: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT COALESCE(
             (SELECT user_uid FROM aliases WHERE alias_uid = ?1),
             (SELECT uid FROM users WHERE uid = ?1)
         )",
        [identifier],
        |row| row.get(0),
    )
}

pub fn find_pair(conn: &Connection, owner_uid: &str, other_uid: &str) -> rusqlite::Result<Option<ClientPair>> {
    conn.query_row(
        "SELECT user_uid, other_user_uid, is_paused FROM client_pairs
         WHERE user_uid = ?1 AND other_user_uid = ?2",
        [owner_uid, other_uid],
        ClientPair::from_row,
    )
    .optional()
}

/// Insert an unpaused edge. Returns false if it already existed.
pub fn insert_pair(conn: &Connection, owner_uid: &str, other_uid: &str) -> rusqlite::Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO client_pairs (user_uid, other_user_uid, is_paused) VALUES (?1, ?2, 0)",
        [owner_uid, other_uid],
    )?;
    Ok(inserted > 0)
}

pub fn set_pause(conn: &Connection, owner_uid: &str, other_uid: &str, paused: bool) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE client_pairs SET is_paused = ?3 WHERE user_uid = ?1 AND other_user_uid = ?2",
        rusqlite::params![owner_uid, other_uid, paused],
    )
}

pub fn delete_pair(conn: &Connection, owner_uid: &str, other_uid: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM client_pairs WHERE user_uid = ?1 AND other_user_uid = ?2",
        [owner_uid, other_uid],
    )
}

/// One view per outgoing edge of `uid`, synced or not.
pub fn paired_clients(conn: &Connection, uid: &str) -> rusqlite::Result<Vec<ClientPairDto>> {
    let mut stmt = conn.prepare(
        "SELECT own.other_user_uid,
                own.is_paused,
                theirs.user_uid IS NOT NULL,
                COALESCE(theirs.is_paused, 0),
                COALESCE(alias.alias_uid, '')
         FROM client_pairs own
         LEFT JOIN client_pairs theirs
                ON theirs.user_uid = own.other_user_uid AND theirs.other_user_uid = own.user_uid
         LEFT JOIN (SELECT user_uid, MIN(alias_uid) AS alias_uid FROM aliases GROUP BY user_uid) alias
                ON alias.user_uid = own.user_uid
         WHERE own.user_uid = ?1
         ORDER BY own.other_user_uid",
    )?;

    let rows = stmt.query_map([uid], |row| {
        Ok(ClientPairDto {
            other_uid: row.get(0)?,
            is_paused: row.get(1)?,
            is_synced: row.get(2)?,
            is_paused_from_others: row.get(3)?,
            vanity_uid: row.get(4)?,
            is_removed: false,
        })
    })?;

    rows.collect()
}

/// `(uid, character_ident)` of synced, mutually unpaused peers that are online.
pub fn online_peers(conn: &Connection, uid: &str) -> rusqlite::Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT u.uid, u.character_ident
         FROM client_pairs own
         JOIN client_pairs theirs
              ON theirs.user_uid = own.other_user_uid AND theirs.other_user_uid = own.user_uid
         JOIN users u ON u.uid = own.other_user_uid
         WHERE own.user_uid = ?1
           AND own.is_paused = 0
           AND theirs.is_paused = 0
           AND u.character_ident <> ''",
    )?;

    let rows = stmt.query_map([uid], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

/// Recipients of a character data push: synced, neither side paused, and the
/// peer's current identity among `visible_characters`.
pub fn push_recipients(
    conn: &Connection,
    uid: &str,
    visible_characters: &[String],
) -> rusqlite::Result<Vec<String>> {
    let visible = serde_json::to_string(visible_characters)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

    let mut stmt = conn.prepare(
        "SELECT theirs.user_uid
         FROM client_pairs own
         JOIN client_pairs theirs
              ON theirs.user_uid = own.other_user_uid AND theirs.other_user_uid = own.user_uid
         JOIN users u ON u.uid = own.other_user_uid
         WHERE own.user_uid = ?1
           AND own.is_paused = 0
           AND theirs.is_paused = 0
           AND u.character_ident IN (SELECT value FROM json_each(?2))",
    )?;

    let rows = stmt.query_map(rusqlite::params![uid, visible], |row| row.get(0))?;
    rows.collect()
}

/// Edges owned by `uid`.
pub fn outgoing_pairs(conn: &Connection, uid: &str) -> rusqlite::Result<Vec<ClientPair>> {
    let mut stmt = conn.prepare(
        "SELECT user_uid, other_user_uid, is_paused FROM client_pairs WHERE user_uid = ?1",
    )?;
    let rows = stmt.query_map([uid], ClientPair::from_row)?;
    rows.collect()
}

/// Edges pointing at `uid`.
pub fn incoming_pairs(conn: &Connection, uid: &str) -> rusqlite::Result<Vec<ClientPair>> {
    let mut stmt = conn.prepare(
        "SELECT user_uid, other_user_uid, is_paused FROM client_pairs WHERE other_user_uid = ?1",
    )?;
    let rows = stmt.query_map([uid], ClientPair::from_row)?;
    rows.collect()
}

/// True while uploaded files still reference `uid` as uploader.
pub fn has_uploads(conn: &Connection, uid: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM files WHERE uploader_uid = ?1)",
        [uid],
        |row| row.get(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        crate::db::migrations::migrations().to_latest(&mut conn).unwrap();
        for (uid, ident) in [("A", "chara-a"), ("B", "chara-b"), ("C", "")] {
            conn.execute(
                "INSERT INTO users (uid, character_ident, created_at) VALUES (?1, ?2, 'now')",
                [uid, ident],
            )
            .unwrap();
        }
        conn
    }

    #[test]
    fn test_paired_clients_unsynced_and_synced() {
        let conn = setup();
        conn.execute("INSERT INTO aliases (alias_uid, user_uid) VALUES ('ALPHA', 'A')", [])
            .unwrap();
        insert_pair(&conn, "A", "B").unwrap();
        insert_pair(&conn, "A", "C").unwrap();
        insert_pair(&conn, "B", "A").unwrap();
        set_pause(&conn, "B", "A", true).unwrap();

        let pairs = paired_clients(&conn, "A").unwrap();
        assert_eq!(pairs.len(), 2);

        assert_eq!(pairs[0].other_uid, "B");
        assert!(pairs[0].is_synced);
        assert!(pairs[0].is_paused_from_others);
        assert_eq!(pairs[0].vanity_uid, "ALPHA");

        assert_eq!(pairs[1].other_uid, "C");
        assert!(!pairs[1].is_synced);
        assert!(!pairs[1].is_paused_from_others);
    }

    #[test]
    fn test_insert_pair_is_idempotent() {
        let conn = setup();
        assert!(insert_pair(&conn, "A", "B").unwrap());
        assert!(!insert_pair(&conn, "A", "B").unwrap());
    }

    #[test]
    fn test_self_edge_rejected_by_schema() {
        let conn = setup();
        assert!(insert_pair(&conn, "A", "A").is_err());
    }

    #[test]
    fn test_push_recipients_filters_visibility_and_pause() {
        let conn = setup();
        insert_pair(&conn, "A", "B").unwrap();
        insert_pair(&conn, "B", "A").unwrap();

        let visible = vec!["chara-b".to_string()];
        assert_eq!(push_recipients(&conn, "A", &visible).unwrap(), vec!["B".to_string()]);
        assert!(push_recipients(&conn, "A", &["someone-else".to_string()]).unwrap().is_empty());

        set_pause(&conn, "B", "A", true).unwrap();
        assert!(push_recipients(&conn, "A", &visible).unwrap().is_empty());
    }

    #[test]
    fn test_resolve_identifier() {
        let conn = setup();
        conn.execute("INSERT INTO aliases (alias_uid, user_uid) VALUES ('BRAVO', 'B')", [])
            .unwrap();

        assert_eq!(resolve_identifier(&conn, "A").unwrap().as_deref(), Some("A"));
        assert_eq!(resolve_identifier(&conn, "BRAVO").unwrap().as_deref(), Some("B"));
        assert_eq!(resolve_identifier(&conn, "NOBODY").unwrap(), None);
    }
}
