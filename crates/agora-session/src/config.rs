//! Session controller configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for the session controller.
///
/// All values are request-frequency bounds, not per-request timeouts; the
/// transport owns those.
///
/// # Example (TOML)
///
/// ```toml
/// [session]
/// min_refresh_interval = "30s"
/// debounce_window = "1s"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Minimum spacing between refresh calls that reach the backend.
    /// Calls inside the window are served from the last known identity.
    #[serde(with = "humantime_serde")]
    pub min_refresh_interval: Duration,

    /// Debounce window for non-urgent subscriber notifications.
    /// Sign-out and sign-in bypass it.
    #[serde(with = "humantime_serde")]
    pub debounce_window: Duration,

    /// Base delay for exponential backoff after a rate-limit response.
    /// The n-th consecutive rejection waits `base × 2^n`, capped below.
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,

    /// Upper bound on the backoff delay.
    #[serde(with = "humantime_serde")]
    pub backoff_cap: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_refresh_interval: Duration::from_secs(30),
            debounce_window: Duration::from_secs(1),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(10),
        }
    }
}

impl SessionConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum refresh spacing.
    #[must_use]
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Sets the notification debounce window.
    #[must_use]
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    /// Sets the backoff base delay.
    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Sets the backoff delay cap.
    #[must_use]
    pub fn with_backoff_cap(mut self, cap: Duration) -> Self {
        self.backoff_cap = cap;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.min_refresh_interval, Duration::from_secs(30));
        assert_eq!(config.debounce_window, Duration::from_secs(1));
        assert_eq!(config.backoff_base, Duration::from_secs(1));
        assert_eq!(config.backoff_cap, Duration::from_secs(10));
    }

    #[test]
    fn test_builder() {
        let config = SessionConfig::new()
            .with_min_refresh_interval(Duration::from_secs(5))
            .with_debounce_window(Duration::from_millis(250));
        assert_eq!(config.min_refresh_interval, Duration::from_secs(5));
        assert_eq!(config.debounce_window, Duration::from_millis(250));
    }

    #[test]
    fn test_humantime_deserialization() {
        let config: SessionConfig = serde_json::from_value(serde_json::json!({
            "min_refresh_interval": "45s",
            "backoff_cap": "8s"
        }))
        .unwrap();
        assert_eq!(config.min_refresh_interval, Duration::from_secs(45));
        assert_eq!(config.backoff_cap, Duration::from_secs(8));
        // Unlisted fields keep their defaults.
        assert_eq!(config.debounce_window, Duration::from_secs(1));
    }
}
