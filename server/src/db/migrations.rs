use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses the SQLite user_version pragma for tracking, so no migration table is needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "-- Migration 1: accounts, pairs, bans

CREATE TABLE users (
    uid TEXT PRIMARY KEY,
    character_ident TEXT NOT NULL DEFAULT '',
    last_logged_in TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE auth (
    hashed_key TEXT PRIMARY KEY,
    user_uid TEXT NOT NULL UNIQUE,
    is_banned INTEGER NOT NULL DEFAULT 0,
    primary_user_uid TEXT,
    FOREIGN KEY (user_uid) REFERENCES users(uid),
    FOREIGN KEY (primary_user_uid) REFERENCES users(uid)
);

CREATE INDEX idx_auth_primary ON auth(primary_user_uid);

CREATE TABLE aliases (
    alias_uid TEXT PRIMARY KEY,
    user_uid TEXT NOT NULL,
    FOREIGN KEY (user_uid) REFERENCES users(uid)
);

CREATE INDEX idx_aliases_user ON aliases(user_uid);

CREATE TABLE client_pairs (
    user_uid TEXT NOT NULL,
    other_user_uid TEXT NOT NULL,
    is_paused INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (user_uid, other_user_uid),
    CHECK (user_uid <> other_user_uid),
    FOREIGN KEY (user_uid) REFERENCES users(uid),
    FOREIGN KEY (other_user_uid) REFERENCES users(uid)
);

CREATE INDEX idx_client_pairs_other ON client_pairs(other_user_uid);

CREATE TABLE banned_users (
    character_ident TEXT PRIMARY KEY,
    reason TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE banned_registrations (
    registration_hash TEXT PRIMARY KEY
);

CREATE TABLE linked_identities (
    external_id INTEGER PRIMARY KEY,
    hashed_registration_id TEXT,
    user_uid TEXT UNIQUE,
    created_at TEXT NOT NULL,
    FOREIGN KEY (user_uid) REFERENCES users(uid)
);

CREATE TABLE files (
    hash TEXT PRIMARY KEY,
    uploader_uid TEXT NOT NULL,
    uploaded_at TEXT NOT NULL,
    FOREIGN KEY (uploader_uid) REFERENCES users(uid)
);

CREATE INDEX idx_files_uploader ON files(uploader_uid);
",
    )])
}
