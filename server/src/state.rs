use std::sync::Arc;
use std::time::Duration;

use crate::auth::geo::GeoLookup;
use crate::auth::secret_key::Authenticator;
use crate::db::DbPool;
use crate::metrics::ServerMetrics;
use crate::sessions::SessionRegistry;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Credential signing secret
    pub jwt_secret: Vec<u8>,
    /// Active WebSocket connections per account
    pub connections: ConnectionRegistry,
    /// Which character identity holds each account right now
    pub sessions: Arc<dyn SessionRegistry>,
    pub authenticator: Arc<dyn Authenticator>,
    pub geo: Arc<dyn GeoLookup>,
    pub metrics: Arc<ServerMetrics>,
    /// TTL of a session registry entry; refreshed on every ping
    pub session_ttl: Duration,
    /// Named in the temporary ban message
    pub temp_ban_minutes: i64,
    /// Delay between upload checks while an account deletion waits
    pub delete_poll_interval: Duration,
}
