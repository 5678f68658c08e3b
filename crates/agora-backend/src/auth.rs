//! The auth gateway trait, request types, and auth-state-change events.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use agora_core::Identity;

use crate::AuthResult;

/// Email/password credentials for sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Account email.
    pub email: String,
    /// Plain-text password; only ever sent over the transport, never stored.
    pub password: String,
}

impl Credentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Registration request for the gateway: credentials plus free-form user
/// metadata the gateway stores alongside the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignUpRequest {
    /// Account email.
    pub email: String,
    /// Plain-text password.
    pub password: String,
    /// Free-form metadata (e.g. display name) attached to the account.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl SignUpRequest {
    /// Creates a request with no metadata.
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Attaches metadata to the request.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// An auth-state change reported by the gateway.
///
/// Gateways emit these on their own operations (a refresh rotating tokens)
/// and on externally-caused changes (the backend invalidating the session).
/// The session controller is the only intended consumer; it decides what,
/// if anything, reaches UI subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    /// A session was established for this identity.
    SignedIn(Identity),
    /// The session ended, locally or backend-side.
    SignedOut,
    /// The session's tokens were refreshed; identity claims re-read.
    TokenRefreshed(Identity),
    /// The user's claims changed (email, metadata).
    UserUpdated(Identity),
}

/// The backend authentication service, as this client sees it.
///
/// Implementations: [`crate::http::HttpBackend`] for the hosted REST
/// backend, [`crate::mock::MockBackend`] for tests.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    /// Returns the identity for the currently-held session, if any.
    ///
    /// `Ok(None)` means "nobody is signed in" and is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway cannot be reached or rejects the
    /// request (e.g. rate limiting).
    async fn session(&self) -> AuthResult<Option<Identity>>;

    /// Exchanges credentials for a session.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AuthError::InvalidCredentials`] for a rejected
    /// pair, or a transport-level error.
    async fn sign_in_with_password(&self, credentials: &Credentials) -> AuthResult<Identity>;

    /// Registers a new account and establishes a session for it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AuthError::AlreadyRegistered`] if the email is
    /// taken, or a transport-level error.
    async fn sign_up(&self, request: &SignUpRequest) -> AuthResult<Identity>;

    /// Ends the current session.
    ///
    /// Idempotent: signing out with no session held is `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns a transport-level error; the local session is dropped
    /// regardless.
    async fn sign_out(&self) -> AuthResult<()>;

    /// Refreshes the held session's tokens and re-reads identity claims.
    ///
    /// `Ok(None)` means the backend no longer recognizes the session.
    ///
    /// # Errors
    ///
    /// Returns [`crate::AuthError::RateLimited`] when the gateway throttles
    /// refreshes, or a transport-level error.
    async fn refresh_session(&self) -> AuthResult<Option<Identity>>;

    /// Subscribes to auth-state-change events.
    ///
    /// Each call returns an independent receiver positioned at the next
    /// event.
    fn events(&self) -> broadcast::Receiver<AuthEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_up_request_metadata() {
        let request = SignUpRequest::new("a@example.com", "pw");
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("metadata").is_none());

        let request = request.with_metadata(serde_json::json!({"display_name": "Acme"}));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["metadata"]["display_name"], "Acme");
    }
}
