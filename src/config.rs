//! Runtime configuration for the analytics buffer.

use crate::types::TRACKID_ATTRIBUTE;
use log::warn;
use std::time::Duration;

/// Configuration for the analytics buffer and its identity bootstrap.
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// How often the poller checks the listener slot while waiting
    pub poll_interval: Duration,

    /// Time after construction without a listener before the buffer expires
    pub registration_timeout: Duration,

    /// Emit debug traces for schedule/send/register
    pub debug: bool,

    /// Persistence key holding the session tracking id
    pub identity_key: String,

    /// Lifetime of the persisted tracking id
    pub identity_ttl: Duration,

    /// Global attribute name the tracking id is published under
    pub trackid_attribute: String,

    /// Topic prefix used by the legacy broadcast listener
    pub broadcast_prefix: String,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        AnalyticsConfig {
            poll_interval: Duration::from_millis(100),
            registration_timeout: Duration::from_millis(10_000),
            debug: false,
            identity_key: "_ccl_tracking_id".to_string(),
            identity_ttl: Duration::from_secs(365 * 24 * 60 * 60),
            trackid_attribute: TRACKID_ATTRIBUTE.to_string(),
            broadcast_prefix: "analytics.".to_string(),
        }
    }
}

impl AnalyticsConfig {
    /// Defaults overridden by `ANALYTICS_*` environment variables.
    ///
    /// Recognised: `ANALYTICS_DEBUG`, `ANALYTICS_POLL_INTERVAL_MS`,
    /// `ANALYTICS_REGISTRATION_TIMEOUT_MS`, `ANALYTICS_IDENTITY_KEY`.
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AnalyticsConfig::default();

        if let Some(raw) = lookup("ANALYTICS_DEBUG") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.debug = true,
                "0" | "false" | "no" | "off" | "" => config.debug = false,
                other => warn!("Ignoring ANALYTICS_DEBUG={:?}", other),
            }
        }

        if let Some(ms) = parse_millis(&lookup, "ANALYTICS_POLL_INTERVAL_MS") {
            // A zero period would make tokio's interval panic
            if ms > 0 {
                config.poll_interval = Duration::from_millis(ms);
            } else {
                warn!("Ignoring ANALYTICS_POLL_INTERVAL_MS=0");
            }
        }

        if let Some(ms) = parse_millis(&lookup, "ANALYTICS_REGISTRATION_TIMEOUT_MS") {
            config.registration_timeout = Duration::from_millis(ms);
        }

        if let Some(key) = lookup("ANALYTICS_IDENTITY_KEY") {
            if !key.trim().is_empty() {
                config.identity_key = key.trim().to_string();
            }
        }

        config
    }
}

fn parse_millis<F>(lookup: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(ms),
        Err(e) => {
            warn!("Ignoring {}={:?}: {}", key, raw, e);
            None
        }
    }
}
