//! Cache coordinator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for the profile cache coordinator.
///
/// # Example (TOML)
///
/// ```toml
/// [cache]
/// ttl = "60s"
/// coalesce_delay = "100ms"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum age before a cached entry is treated as stale.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// How long a new fetch waits before hitting the store, so
    /// near-simultaneous mounts collapse into one request.
    #[serde(with = "humantime_serde")]
    pub coalesce_delay: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            coalesce_delay: Duration::from_millis(100),
        }
    }
}

impl CacheConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the entry TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the fetch coalescing delay.
    #[must_use]
    pub fn with_coalesce_delay(mut self, delay: Duration) -> Self {
        self.coalesce_delay = delay;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(60));
        assert_eq!(config.coalesce_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_builder() {
        let config = CacheConfig::new()
            .with_ttl(Duration::from_secs(10))
            .with_coalesce_delay(Duration::from_millis(20));
        assert_eq!(config.ttl, Duration::from_secs(10));
        assert_eq!(config.coalesce_delay, Duration::from_millis(20));
    }
}
