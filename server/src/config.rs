use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Pairlink pairing and presence server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "pairlink-server", version, about = "Pairlink pairing and presence server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PAIRLINK_PORT", default_value = "6200")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "PAIRLINK_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./pairlink.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "PAIRLINK_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Register a new account, print its uid and secret key, and exit
    #[arg(long)]
    pub register_account: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long, env = "PAIRLINK_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Shared credential signing secret; generated into data_dir when unset
    #[arg(long, env = "PAIRLINK_JWT_SECRET")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_secret: Option<String>,

    /// Continent code placed in credentials
    #[arg(long, env = "PAIRLINK_DEFAULT_CONTINENT", default_value = "*")]
    pub default_continent: String,

    /// Delay between checks for outstanding uploads while deleting an account
    #[arg(long, env = "PAIRLINK_DELETE_POLL_INTERVAL_MS", default_value = "1000")]
    pub delete_poll_interval_ms: u64,

    /// Secret key authentication settings (loaded from [auth] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub auth: AuthConfig,

    /// Session registry settings (loaded from [sessions] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub sessions: SessionConfig,
}

/// Configuration for secret key authentication and temporary bans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Failed attempts from one IP before it is temporarily banned (default: 5)
    #[serde(default = "default_failed_attempts")]
    pub failed_attempts_for_temp_ban: u32,

    /// Length of a temporary ban in minutes (default: 5)
    #[serde(default = "default_temp_ban_minutes")]
    pub temp_ban_minutes: i64,

    /// How long a successful key lookup is cached, in seconds (default: 60)
    #[serde(default = "default_positive_cache_secs")]
    pub positive_cache_secs: i64,

    /// IPs that are never temporarily banned
    #[serde(default)]
    pub whitelisted_ips: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            failed_attempts_for_temp_ban: 5,
            temp_ban_minutes: 5,
            positive_cache_secs: 60,
            whitelisted_ips: Vec::new(),
        }
    }
}

fn default_failed_attempts() -> u32 {
    5
}

fn default_temp_ban_minutes() -> i64 {
    5
}

fn default_positive_cache_secs() -> i64 {
    60
}

/// Configuration for the session registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Lifetime of a session entry; refreshed on every ping (default: 60)
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,

    /// Redis URL; the in-memory registry is used when unset
    #[serde(default)]
    pub redis_url: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            redis_url: None,
        }
    }
}

fn default_session_ttl() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 6200,
            bind_address: "0.0.0.0".to_string(),
            config: "./pairlink.toml".to_string(),
            json_logs: false,
            generate_config: false,
            register_account: false,
            data_dir: "./data".to_string(),
            jwt_secret: None,
            default_continent: "*".to_string(),
            delete_poll_interval_ms: 1000,
            auth: AuthConfig::default(),
            sessions: SessionConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (PAIRLINK_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("PAIRLINK_").split("__"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Pairlink Server Configuration
# Place this file at ./pairlink.toml or specify with --config <path>
# All settings can be overridden via environment variables (PAIRLINK_PORT,
# PAIRLINK_AUTH__TEMP_BAN_MINUTES, etc.) or CLI flags (--port, etc.)

# Server port (default: 6200)
# port = 6200

# Bind address (default: 0.0.0.0)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and credential signing key
# data_dir = "./data"

# Shared credential signing secret. Generated into data_dir when unset.
# jwt_secret = ""

# Continent code placed in issued credentials
# default_continent = "*"

# Delay between upload checks while an account deletion waits (milliseconds)
# delete_poll_interval_ms = 1000

# ---- Secret Key Authentication ----
# [auth]
# failed_attempts_for_temp_ban = 5
# temp_ban_minutes = 5
# positive_cache_secs = 60
# whitelisted_ips = []

# ---- Session Registry ----
# [sessions]
# ttl_secs = 60           # refreshed on every WebSocket ping
# redis_url = "redis://127.0.0.1:6379"   # in-memory registry when unset
"#
    .to_string()
}
