//! The cache entry and its observable state.

use std::time::Duration;

use tokio::time::Instant;

use agora_core::{ProfileRecord, UserId};

use crate::error::CacheFetchError;

/// What the single cache slot holds for its owner.
#[derive(Debug, Clone)]
pub enum CacheState {
    /// A fetch is in flight; the payload is not known yet.
    Loading,
    /// The fetch settled. `None` is a valid result: the owner has no
    /// profile row yet, as opposed to the row having failed to load.
    Ready(Option<ProfileRecord>),
    /// The fetch failed; served to callers until invalidated, refetched,
    /// or expired.
    Errored(CacheFetchError),
}

/// The one process-wide cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The user this entry belongs to. Consumable only while it matches
    /// the current identity.
    pub owner_id: UserId,

    /// When the entry was written; freshness is measured from here.
    pub fetched_at: Instant,

    /// Current state.
    pub state: CacheState,
}

impl CacheEntry {
    /// An entry for a fetch that just started.
    #[must_use]
    pub fn loading(owner_id: UserId) -> Self {
        Self {
            owner_id,
            fetched_at: Instant::now(),
            state: CacheState::Loading,
        }
    }

    /// An entry for a settled fetch, success or failure.
    #[must_use]
    pub fn settled(owner_id: UserId, outcome: Result<Option<ProfileRecord>, CacheFetchError>) -> Self {
        let state = match outcome {
            Ok(payload) => CacheState::Ready(payload),
            Err(error) => CacheState::Errored(error),
        };
        Self {
            owner_id,
            fetched_at: Instant::now(),
            state,
        }
    }

    /// Whether the entry may serve `owner_id` under the given TTL.
    #[must_use]
    pub fn is_fresh_for(&self, owner_id: &UserId, ttl: Duration) -> bool {
        self.owner_id == *owner_id && self.fetched_at.elapsed() < ttl
    }
}

/// Externally visible slot state, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// No entry is held.
    Empty,
    /// A fetch is in flight.
    Loading,
    /// A settled payload (possibly "no row") is held.
    Ready,
    /// A settled failure is held.
    Errored,
}

/// A point-in-time snapshot of the coordinator, for diagnostics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Slot state.
    pub status: CacheStatus,

    /// Owner of the held entry, if any.
    pub owner_id: Option<UserId>,

    /// Age of the held entry, if any.
    pub age: Option<Duration>,

    /// Number of fetches currently in flight.
    pub inflight_fetches: usize,

    /// Invalidation epoch; bumps on every invalidation.
    pub epoch: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_freshness_window() {
        let entry = CacheEntry::settled(UserId::new("user-1"), Ok(None));
        let ttl = Duration::from_secs(60);

        assert!(entry.is_fresh_for(&UserId::new("user-1"), ttl));
        assert!(!entry.is_fresh_for(&UserId::new("user-2"), ttl));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!entry.is_fresh_for(&UserId::new("user-1"), ttl));
    }

    #[test]
    fn test_settled_state_mapping() {
        let ready = CacheEntry::settled(UserId::new("user-1"), Ok(None));
        assert!(matches!(ready.state, CacheState::Ready(None)));

        let errored = CacheEntry::settled(
            UserId::new("user-1"),
            Err(CacheFetchError::Cancelled),
        );
        assert!(matches!(errored.state, CacheState::Errored(_)));
    }
}
