pub mod migrations;
pub mod models;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Type alias for the shared database connection.
/// rusqlite is synchronous, so the connection is wrapped in Arc<Mutex> and used
/// through tokio::task::spawn_blocking (see `run_blocking`).
pub type DbPool = Arc<Mutex<Connection>>;

/// Failure of a store operation.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database lock poisoned")]
    Poisoned,
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Initialize the SQLite database: create data directory if needed,
/// open (or create) the database file, enable WAL mode, and run migrations.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join("pairlink.db");
    let mut conn = Connection::open(&db_path)?;

    // WAL for concurrent readers, FKs for the identifier links between tables
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    migrations::migrations().to_latest(&mut conn)?;

    tracing::info!("Database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}

/// Run `f` against the shared connection on the blocking pool.
///
/// The lock is held only for the duration of `f`, so callers that poll
/// (account deletion) never keep the store locked between attempts.
pub async fn run_blocking<T, F>(db: &DbPool, f: F) -> Result<T, DbError>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = db.lock().map_err(|_| DbError::Poisoned)?;
        f(&mut conn).map_err(DbError::from)
    })
    .await?
}
