//! Cloud backend configuration.

use std::time::Duration;

pub const ENV_CLOUD_URL: &str = "FINSYNC_CLOUD_URL";
pub const ENV_CLOUD_API_KEY: &str = "FINSYNC_CLOUD_API_KEY";
pub const ENV_CLOUD_POLL_SECS: &str = "FINSYNC_CLOUD_POLL_SECS";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudConfig {
    /// Base URL of the document service, without trailing slash.
    pub endpoint: String,
    pub api_key: Option<String>,
    /// How often `watch` polls a collection.
    pub poll_interval: Duration,
}

impl CloudConfig {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim().trim_end_matches('/').to_string(),
            api_key: None,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Reads the configuration from the environment. `None` when no endpoint is set,
    /// which leaves the cloud backend unconfigured.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let endpoint = lookup(ENV_CLOUD_URL)
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())?;

        let mut config = Self::new(&endpoint);
        config.api_key = lookup(ENV_CLOUD_API_KEY)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        if let Some(secs) = lookup(ENV_CLOUD_POLL_SECS)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
        {
            config.poll_interval = Duration::from_secs(secs);
        }
        Some(config)
    }
}
