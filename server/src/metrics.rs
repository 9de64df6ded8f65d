//! Named counters and gauges for pair counts, push volume and admission results.
//!
//! Callers address metrics by name; the set of names is fixed at construction.
//! Updates are best-effort and never fail the operation that triggers them.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use rusqlite::Connection;
use std::collections::HashMap;

pub const GAUGE_PAIRS: &str = "pairlink_pairs";
pub const GAUGE_PAIRS_PAUSED: &str = "pairlink_pairs_paused";
pub const GAUGE_USERS_REGISTERED: &str = "pairlink_users_registered";

pub const COUNTER_USER_PUSH_DATA: &str = "pairlink_user_push_data";
pub const COUNTER_USER_PUSH_DATA_TO: &str = "pairlink_user_push_data_to";
pub const COUNTER_AUTHENTICATION_SUCCESSES: &str = "pairlink_authentication_successes";
pub const COUNTER_AUTHENTICATION_FAILURES: &str = "pairlink_authentication_failures";

const GAUGES: &[(&str, &str)] = &[
    (GAUGE_PAIRS, "Number of directed pair edges"),
    (GAUGE_PAIRS_PAUSED, "Number of paused pair edges"),
    (GAUGE_USERS_REGISTERED, "Number of registered accounts"),
];

const COUNTERS: &[(&str, &str)] = &[
    (COUNTER_USER_PUSH_DATA, "Character data pushes received"),
    (COUNTER_USER_PUSH_DATA_TO, "Character data deliveries fanned out to paired accounts"),
    (COUNTER_AUTHENTICATION_SUCCESSES, "Successful secret key authentications"),
    (COUNTER_AUTHENTICATION_FAILURES, "Failed secret key authentications"),
];

pub struct ServerMetrics {
    registry: Registry,
    counters: HashMap<&'static str, IntCounter>,
    gauges: HashMap<&'static str, IntGauge>,
}

impl ServerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let mut counters = HashMap::new();
        let mut gauges = HashMap::new();

        for (name, help) in COUNTERS {
            let counter = IntCounter::new(*name, *help)?;
            registry.register(Box::new(counter.clone()))?;
            counters.insert(*name, counter);
        }

        for (name, help) in GAUGES {
            let gauge = IntGauge::new(*name, *help)?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.insert(*name, gauge);
        }

        Ok(Self {
            registry,
            counters,
            gauges,
        })
    }

    pub fn increase_counter(&self, name: &str, value: u64) {
        match self.counters.get(name) {
            Some(counter) => counter.inc_by(value),
            None => tracing::warn!(metric = %name, "Unknown counter"),
        }
    }

    pub fn inc_gauge(&self, name: &str, value: i64) {
        match self.gauges.get(name) {
            Some(gauge) => gauge.add(value),
            None => tracing::warn!(metric = %name, "Unknown gauge"),
        }
    }

    pub fn dec_gauge(&self, name: &str, value: i64) {
        match self.gauges.get(name) {
            Some(gauge) => gauge.sub(value),
            None => tracing::warn!(metric = %name, "Unknown gauge"),
        }
    }

    pub fn counter_value(&self, name: &str) -> u64 {
        self.counters.get(name).map(|c| c.get()).unwrap_or(0)
    }

    pub fn gauge_value(&self, name: &str) -> i64 {
        self.gauges.get(name).map(|g| g.get()).unwrap_or(0)
    }

    /// Set the gauges from the current store contents. Called once at startup.
    pub fn seed_from_store(&self, conn: &Connection) -> rusqlite::Result<()> {
        let count = |sql: &str| conn.query_row(sql, [], |row| row.get::<_, i64>(0));

        self.set_gauge(GAUGE_USERS_REGISTERED, count("SELECT COUNT(*) FROM users")?);
        self.set_gauge(GAUGE_PAIRS, count("SELECT COUNT(*) FROM client_pairs")?);
        self.set_gauge(
            GAUGE_PAIRS_PAUSED,
            count("SELECT COUNT(*) FROM client_pairs WHERE is_paused = 1")?,
        );
        Ok(())
    }

    fn set_gauge(&self, name: &str, value: i64) {
        if let Some(gauge) = self.gauges.get(name) {
            gauge.set(value);
        }
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();

        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
            return format!("# Failed to encode metrics: {}\n", e);
        }

        String::from_utf8(buffer).unwrap_or_else(|e| {
            tracing::error!("Failed to convert metrics to UTF-8: {}", e);
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        })
    }
}
