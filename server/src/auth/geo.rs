use async_trait::async_trait;
use std::net::IpAddr;

/// Resolves the continent code placed in issued credentials.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn continent_for(&self, ip: IpAddr) -> String;
}

/// Answers every lookup with one configured continent code.
#[derive(Debug, Clone)]
pub struct StaticGeoLookup {
    continent: String,
}

impl StaticGeoLookup {
    pub fn new(continent: impl Into<String>) -> Self {
        Self {
            continent: continent.into(),
        }
    }
}

#[async_trait]
impl GeoLookup for StaticGeoLookup {
    async fn continent_for(&self, _ip: IpAddr) -> String {
        self.continent.clone()
    }
}
