use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use pairlink_server::auth::geo::StaticGeoLookup;
use pairlink_server::auth::secret_key::SecretKeyAuthenticator;
use pairlink_server::config::{generate_config_template, Config};
use pairlink_server::metrics::{ServerMetrics, GAUGE_USERS_REGISTERED};
use pairlink_server::sessions::{
    spawn_session_sweeper, MemorySessionRegistry, RedisSessionRegistry, SessionRegistry,
};
use pairlink_server::{accounts, auth, db, routes, state, ws};

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pairlink_server=info"));
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(env_filter).init();
    }

    tracing::info!("Pairlink server v{} starting", env!("CARGO_PKG_VERSION"));

    let db = db::init_db(&config.data_dir)?;

    let metrics = Arc::new(ServerMetrics::new()?);

    // Handle --register-account: create an account, print its credentials and exit
    if config.register_account {
        let account = {
            let mut conn = db.lock().map_err(|_| "database lock poisoned")?;
            accounts::register_account(&mut conn, &metrics)?
        };
        println!("uid: {}", account.uid);
        println!("secret key: {}", account.secret_key);
        return Ok(());
    }

    let jwt_secret = match &config.jwt_secret {
        Some(secret) if !secret.is_empty() => secret.as_bytes().to_vec(),
        _ => auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?,
    };

    {
        let conn = db.lock().map_err(|_| "database lock poisoned")?;
        metrics.seed_from_store(&conn)?;
    }
    tracing::info!(
        users = metrics.gauge_value(GAUGE_USERS_REGISTERED),
        "Metrics seeded from store"
    );

    let sessions: Arc<dyn SessionRegistry> = match &config.sessions.redis_url {
        Some(url) => Arc::new(RedisSessionRegistry::connect(url).await?) as Arc<dyn SessionRegistry>,
        None => {
            tracing::info!("Using in-memory session registry");
            let registry = Arc::new(MemorySessionRegistry::new());
            spawn_session_sweeper(registry.clone(), HOUSEKEEPING_INTERVAL);
            registry as Arc<dyn SessionRegistry>
        }
    };

    let authenticator = Arc::new(SecretKeyAuthenticator::new(
        db.clone(),
        config.auth.clone(),
        metrics.clone(),
    ));
    let purge_authenticator = authenticator.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(HOUSEKEEPING_INTERVAL).await;
            purge_authenticator.purge_expired();
        }
    });

    let app_state = state::AppState {
        db,
        jwt_secret,
        connections: ws::new_connection_registry(),
        sessions,
        authenticator,
        geo: Arc::new(StaticGeoLookup::new(config.default_continent.clone())),
        metrics,
        session_ttl: Duration::from_secs(config.sessions.ttl_secs),
        temp_ban_minutes: config.auth.temp_ban_minutes,
        delete_poll_interval: Duration::from_millis(config.delete_poll_interval_ms),
    };

    let app = routes::build_router(app_state);

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
