//! Cache fetch errors.

use agora_backend::StoreError;

/// Why a profile request failed for the callers attached to it.
///
/// Cloneable because one failed fetch fans out to every attached caller.
/// A missing profile row is *not* an error; it resolves as `Ok(None)`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheFetchError {
    /// The record store query failed.
    #[error("Profile fetch failed: {0}")]
    Store(#[from] StoreError),

    /// The consumer's cancellation token fired while the request was in
    /// flight. The fetch itself keeps running for other consumers.
    #[error("Consumer cancelled")]
    Cancelled,
}

impl CacheFetchError {
    /// Returns `true` for failures a manual `refetch` might clear.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(error) => error.is_transient(),
            Self::Cancelled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = CacheFetchError::from(StoreError::server(500, "boom"));
        assert_eq!(err.to_string(), "Profile fetch failed: Server error (500): boom");
        assert_eq!(CacheFetchError::Cancelled.to_string(), "Consumer cancelled");
    }

    #[test]
    fn test_transience() {
        assert!(CacheFetchError::from(StoreError::network("reset")).is_transient());
        assert!(!CacheFetchError::from(StoreError::not_authorized("rls")).is_transient());
        assert!(!CacheFetchError::Cancelled.is_transient());
    }
}
