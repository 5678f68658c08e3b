//! Backend error taxonomies.
//!
//! Two families: [`AuthError`] for the auth gateway, [`StoreError`] for the
//! record store. Both are cloneable so a single failure can fan out to every
//! caller attached to the same in-flight operation.

use std::time::Duration;

/// Errors returned by the auth gateway.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    /// The email/password pair was rejected.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Sign-up was rejected because the email is already registered.
    #[error("Already registered: {email}")]
    AlreadyRegistered {
        /// The email that is already taken.
        email: String,
    },

    /// The gateway is rate-limiting this client.
    #[error("Rate limited")]
    RateLimited {
        /// Server-suggested wait, from a `Retry-After` header if present.
        retry_after: Option<Duration>,
    },

    /// The request never produced a response (DNS, connect, timeout).
    #[error("Network error: {message}")]
    Network {
        /// Description of the transport failure.
        message: String,
    },

    /// The gateway answered with something this client cannot interpret.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the malformed response.
        message: String,
    },

    /// The gateway reported a server-side failure.
    #[error("Backend error ({status}): {message}")]
    Backend {
        /// HTTP status code.
        status: u16,
        /// Description from the response body, if any.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `RateLimited` error without a server-suggested wait.
    #[must_use]
    pub fn rate_limited() -> Self {
        Self::RateLimited { retry_after: None }
    }

    /// Creates a new `AlreadyRegistered` error.
    #[must_use]
    pub fn already_registered(email: impl Into<String>) -> Self {
        Self::AlreadyRegistered {
            email: email.into(),
        }
    }

    /// Creates a new `Network` error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a new `Protocol` error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a new `Backend` error.
    #[must_use]
    pub fn backend(status: u16, message: impl Into<String>) -> Self {
        Self::Backend {
            status,
            message: message.into(),
        }
    }

    /// Returns `true` if the gateway asked this client to slow down.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Returns `true` for failures the user can act on (bad credentials,
    /// taken email) as opposed to infrastructure trouble.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials | Self::AlreadyRegistered { .. }
        )
    }

    /// Returns `true` for transient failures worth retrying later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Network { .. } | Self::Backend { .. }
        )
    }
}

/// Errors returned by the record store.
///
/// A missing row is never an error; store reads return `Ok(None)` for it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The request never produced a response (DNS, connect, timeout).
    #[error("Network error: {message}")]
    Network {
        /// Description of the transport failure.
        message: String,
    },

    /// The store reported a server-side failure.
    #[error("Server error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Description from the response body, if any.
        message: String,
    },

    /// The caller's credentials do not permit this operation.
    #[error("Not authorized: {message}")]
    NotAuthorized {
        /// Description of the refusal.
        message: String,
    },

    /// A write conflicted with an existing row.
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the conflicting state.
        message: String,
    },

    /// The store answered with something this client cannot interpret.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the malformed response.
        message: String,
    },
}

impl StoreError {
    /// Creates a new `Network` error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a new `Server` error.
    #[must_use]
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Creates a new `NotAuthorized` error.
    #[must_use]
    pub fn not_authorized(message: impl Into<String>) -> Self {
        Self::NotAuthorized {
            message: message.into(),
        }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new `Protocol` error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns `true` for transient failures a later retry might clear.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Server { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_display() {
        assert_eq!(AuthError::InvalidCredentials.to_string(), "Invalid credentials");
        assert_eq!(
            AuthError::already_registered("a@example.com").to_string(),
            "Already registered: a@example.com"
        );
        assert_eq!(
            AuthError::backend(502, "upstream down").to_string(),
            "Backend error (502): upstream down"
        );
    }

    #[test]
    fn test_auth_error_predicates() {
        assert!(AuthError::rate_limited().is_rate_limited());
        assert!(AuthError::rate_limited().is_transient());
        assert!(!AuthError::rate_limited().is_user_error());

        assert!(AuthError::InvalidCredentials.is_user_error());
        assert!(!AuthError::InvalidCredentials.is_transient());

        assert!(AuthError::network("refused").is_transient());
    }

    #[test]
    fn test_store_error_display() {
        assert_eq!(
            StoreError::server(500, "boom").to_string(),
            "Server error (500): boom"
        );
        assert_eq!(
            StoreError::not_authorized("row-level policy").to_string(),
            "Not authorized: row-level policy"
        );
    }

    #[test]
    fn test_store_error_predicates() {
        assert!(StoreError::network("reset").is_transient());
        assert!(StoreError::server(503, "busy").is_transient());
        assert!(!StoreError::not_authorized("nope").is_transient());
        assert!(!StoreError::conflict("dup").is_transient());
    }
}
