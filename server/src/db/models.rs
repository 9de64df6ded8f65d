/// Database row types.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.

/// Directed pair edge in the client_pairs table.
/// `is_paused` only affects what `user_uid` receives from `other_user_uid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPair {
    pub user_uid: String,
    pub other_user_uid: String,
    pub is_paused: bool,
}

impl ClientPair {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_uid: row.get(0)?,
            other_user_uid: row.get(1)?,
            is_paused: row.get(2)?,
        })
    }
}

/// Auth record joined with the account alias, as seen by the authenticator.
#[derive(Debug, Clone)]
pub struct AuthRecord {
    pub user_uid: String,
    pub is_banned: bool,
    pub primary_user_uid: Option<String>,
    pub alias: Option<String>,
}

/// External identity linked to an account (registration hash + numeric id).
#[derive(Debug, Clone)]
pub struct LinkedIdentity {
    pub external_id: i64,
    pub hashed_registration_id: Option<String>,
    pub user_uid: String,
}
