//! reqwest transport for the hosted backend.
//!
//! One [`HttpBackend`] implements both seams: [`crate::AuthGateway`]
//! against the backend's token-grant auth endpoints (`/auth/v1/…`) and
//! [`crate::RecordStore`] against its filtered REST record endpoints
//! (`/rest/v1/…`).
//!
//! The backend holds the session's token pair internally; callers above
//! this crate only ever see [`agora_core::Identity`] values. Per-request
//! timeouts live here, on the reqwest client — the coordination layer's
//! throttles and TTLs are request-frequency bounds, not timeouts.
//!
//! # Security Considerations
//!
//! - Only HTTPS endpoints are accepted unless `allow_http` is set (tests)
//! - Credentials and tokens are never logged
//! - Responses are decoded strictly; unexpected shapes become
//!   `Protocol` errors rather than being guessed at

mod auth;
mod store;

use std::time::Duration;

use tokio::sync::{RwLock, broadcast};
use url::Url;

use agora_core::Identity;

use crate::auth::AuthEvent;
use crate::error::AuthError;

/// Buffered auth events per subscriber before lag drops the oldest.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Configuration for the HTTP backend.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Base URL of the backend project, e.g. `https://example.backend.io`.
    pub base_url: Url,

    /// Project API key, sent as the `apikey` header and used as the bearer
    /// token for anonymous record reads.
    pub api_key: String,

    /// Per-request timeout (default: 10 seconds).
    pub request_timeout: Duration,

    /// Whether to allow plain-HTTP endpoints.
    /// This should only be enabled for testing.
    pub allow_http: bool,
}

impl HttpConfig {
    /// Creates a configuration with default timeout and HTTPS enforcement.
    #[must_use]
    pub fn new(base_url: Url, api_key: impl Into<String>) -> Self {
        Self {
            base_url,
            api_key: api_key.into(),
            request_timeout: Duration::from_secs(10),
            allow_http: false,
        }
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Allows plain-HTTP endpoints.
    ///
    /// # Warning
    ///
    /// This should only be used for testing against local mock servers.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }
}

/// The session tokens held for the signed-in user.
#[derive(Debug, Clone)]
pub(crate) struct TokenSet {
    pub(crate) access_token: String,
    pub(crate) refresh_token: String,
    pub(crate) identity: Identity,
}

/// HTTP implementation of the auth gateway and the record store.
#[derive(Debug)]
pub struct HttpBackend {
    pub(crate) config: HttpConfig,
    pub(crate) client: reqwest::Client,
    pub(crate) tokens: RwLock<Option<TokenSet>>,
    pub(crate) events_tx: broadcast::Sender<AuthEvent>,
}

impl HttpBackend {
    /// Creates a backend from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL scheme is not HTTPS (and
    /// `allow_http` is off) or the HTTP client cannot be constructed.
    pub fn new(config: HttpConfig) -> Result<Self, AuthError> {
        if config.base_url.scheme() != "https" && !config.allow_http {
            return Err(AuthError::protocol(format!(
                "refusing non-HTTPS backend URL: {}",
                config.base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AuthError::protocol(format!("failed to build HTTP client: {e}")))?;

        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            client,
            tokens: RwLock::new(None),
            events_tx,
        })
    }

    /// Builds an endpoint URL from path segments under the base URL.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.config.base_url.clone();
        {
            // Base URLs with cannot-be-a-base forms are rejected in new(),
            // so path_segments_mut cannot fail here.
            let mut path = url
                .path_segments_mut()
                .expect("base URL accepts path segments");
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        url
    }

    /// Emits an auth event to whoever is listening.
    pub(crate) fn emit(&self, event: AuthEvent) {
        // No receivers is fine; events are advisory.
        let _ = self.events_tx.send(event);
    }

    /// The bearer token for record requests: the session's access token
    /// when signed in, the project key otherwise.
    pub(crate) async fn record_bearer(&self) -> String {
        match self.tokens.read().await.as_ref() {
            Some(tokens) => tokens.access_token.clone(),
            None => self.config.api_key.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base: &str) -> HttpConfig {
        HttpConfig::new(Url::parse(base).unwrap(), "anon-key")
    }

    #[test]
    fn test_config_defaults() {
        let config = config("https://example.backend.io");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(!config.allow_http);
    }

    #[test]
    fn test_https_enforced() {
        let err = HttpBackend::new(config("http://example.backend.io")).unwrap_err();
        assert!(matches!(err, AuthError::Protocol { .. }));

        let backend =
            HttpBackend::new(config("http://example.backend.io").with_allow_http(true));
        assert!(backend.is_ok());
    }

    #[test]
    fn test_endpoint_building() {
        let backend = HttpBackend::new(config("https://example.backend.io")).unwrap();
        assert_eq!(
            backend.endpoint(&["auth", "v1", "token"]).as_str(),
            "https://example.backend.io/auth/v1/token"
        );

        // Trailing slash on the base does not double up.
        let backend = HttpBackend::new(config("https://example.backend.io/")).unwrap();
        assert_eq!(
            backend.endpoint(&["rest", "v1", "profiles"]).as_str(),
            "https://example.backend.io/rest/v1/profiles"
        );
    }
}
