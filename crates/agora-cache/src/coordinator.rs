//! The profile cache coordinator.
//!
//! One [`ProfileCache`] per process supplies the profile record for an
//! owner id with at most one store fetch per owner per TTL window,
//! consistently across any number of concurrent consumers:
//!
//! - **Single-flight**: concurrent requests for the same owner attach to
//!   one pending fetch; a short coalescing delay folds near-simultaneous
//!   mounts into it as well.
//! - **TTL**: a settled entry serves reads until it ages out.
//! - **Identity-aware**: the coordinator consumes the session
//!   controller's identity watch. No identity means no network access,
//!   and a fetch whose owner no longer matches the identity at
//!   resolution time is discarded rather than cached.
//!
//! All coordination state lives behind one lock: the cache slot, the
//! in-flight map, and the invalidation epoch move together, so a waiter
//! can never subscribe to a fetch that already settled.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use agora_backend::store::RecordStore;
use agora_core::{Identity, Profile, ProfileId, ProfileRecord, UserId};

use crate::config::CacheConfig;
use crate::entry::{CacheEntry, CacheState, CacheStats, CacheStatus};
use crate::error::CacheFetchError;

/// Type alias for coordinator results.
pub type CacheResult<T> = Result<T, CacheFetchError>;

/// What a settled fetch fans out to its attached callers.
type FetchOutcome = CacheResult<Option<ProfileRecord>>;

/// A pending fetch and the channel its waiters attach to.
struct InFlightFetch {
    /// Distinguishes this fetch from a later one for the same owner, so a
    /// finished task only cleans up its own registration.
    id: u64,
    tx: broadcast::Sender<FetchOutcome>,
}

/// Everything the coordinator mutates, behind one lock.
#[derive(Default)]
struct CoordinatorState {
    /// The single process-wide cache entry.
    slot: Option<CacheEntry>,
    /// At most one outstanding fetch per owner id.
    inflight: HashMap<UserId, InFlightFetch>,
    /// Bumped by every invalidation; a fetch that started under an older
    /// epoch must not write the slot.
    epoch: u64,
    next_fetch_id: u64,
}

/// Supplies profile records to consumers while protecting the store from
/// request storms.
///
/// Cheap to clone; all clones share the one cache slot and in-flight map.
/// Create one per process with [`ProfileCache::new`], passing the session
/// controller's identity watch.
#[derive(Clone)]
pub struct ProfileCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    store: Arc<dyn RecordStore>,
    identity_rx: watch::Receiver<Option<Identity>>,
    state: Mutex<CoordinatorState>,
    config: CacheConfig,
    watcher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ProfileCache {
    /// Creates the coordinator and starts watching the identity feed for
    /// sign-outs.
    pub fn new(
        store: Arc<dyn RecordStore>,
        identity_rx: watch::Receiver<Option<Identity>>,
        config: CacheConfig,
    ) -> Self {
        let inner = Arc::new(CacheInner {
            store,
            identity_rx: identity_rx.clone(),
            state: Mutex::new(CoordinatorState::default()),
            config,
            watcher: std::sync::Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let handle = tokio::spawn(CacheInner::run_watcher(weak, identity_rx));
        *inner
            .watcher
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);

        Self { inner }
    }

    /// Returns the owner's profile record, from cache when possible.
    ///
    /// With no identity this resolves to `Ok(None)` without touching the
    /// network. `Ok(None)` with an identity means the owner has no profile
    /// row yet.
    ///
    /// # Errors
    ///
    /// Returns the failure of the fetch this caller attached to. Failures
    /// are not retried automatically; call [`Self::refetch`].
    pub async fn get_profile(&self, owner_id: &UserId) -> FetchOutcome {
        CacheInner::lookup(&self.inner, owner_id, false).await
    }

    /// [`Self::get_profile`] guarded by a consumer cancellation token.
    ///
    /// If the token fires while the fetch is in flight, this resolves to
    /// [`CacheFetchError::Cancelled`] without the consumer ever seeing the
    /// payload — but the fetch itself is not aborted and still populates
    /// the cache for other consumers.
    ///
    /// # Errors
    ///
    /// As [`Self::get_profile`], plus `Cancelled`.
    pub async fn get_profile_guarded(
        &self,
        owner_id: &UserId,
        consumer: &CancellationToken,
    ) -> FetchOutcome {
        if consumer.is_cancelled() {
            return Err(CacheFetchError::Cancelled);
        }
        tokio::select! {
            outcome = CacheInner::lookup(&self.inner, owner_id, false) => {
                if consumer.is_cancelled() {
                    return Err(CacheFetchError::Cancelled);
                }
                outcome
            }
            () = consumer.cancelled() => Err(CacheFetchError::Cancelled),
        }
    }

    /// Forces a fresh fetch, bypassing the TTL but still single-flight;
    /// a writer calls this to observe its own write.
    ///
    /// # Errors
    ///
    /// As [`Self::get_profile`].
    pub async fn refetch(&self, owner_id: &UserId) -> FetchOutcome {
        CacheInner::lookup(&self.inner, owner_id, true).await
    }

    /// Clears the cache entry if it belongs to `owner_id`, or
    /// unconditionally when `None`. Pending fetches are detached: they
    /// still resolve their attached callers, but their results no longer
    /// reach the cache, and the next `get_profile` starts fresh.
    pub async fn invalidate(&self, owner_id: Option<&UserId>) {
        let mut state = self.inner.state.lock().await;
        match owner_id {
            Some(owner_id) => {
                if state.slot.as_ref().is_some_and(|e| e.owner_id == *owner_id) {
                    state.slot = None;
                }
                state.inflight.remove(owner_id);
            }
            None => {
                state.slot = None;
                state.inflight.clear();
            }
        }
        state.epoch += 1;
        tracing::debug!(
            owner = owner_id.map(UserId::as_str),
            epoch = state.epoch,
            "cache invalidated"
        );
    }

    // -------------------------------------------------------------------------
    // Write-through helpers
    // -------------------------------------------------------------------------

    /// Inserts a profile row, then refetches so the writer observes its
    /// own write.
    ///
    /// # Errors
    ///
    /// Store failures propagate; the cache is invalidated regardless once
    /// the insert has been attempted.
    pub async fn create_profile(&self, profile: &Profile) -> FetchOutcome {
        let result = self.inner.store.insert_profile(profile).await;
        self.invalidate(Some(&profile.owner_id)).await;
        let stored = result?;
        self.refetch(&stored.owner_id).await
    }

    /// Updates a profile row, then refetches so the writer observes its
    /// own write.
    ///
    /// # Errors
    ///
    /// Store failures propagate; the cache is invalidated regardless once
    /// the update has been attempted.
    pub async fn save_profile(&self, profile: &Profile) -> FetchOutcome {
        let result = self.inner.store.update_profile(profile).await;
        self.invalidate(Some(&profile.owner_id)).await;
        let stored = result?;
        self.refetch(&stored.owner_id).await
    }

    /// Deletes a profile row and drops the cache entry for its owner.
    ///
    /// # Errors
    ///
    /// Store failures propagate; the cache is invalidated regardless.
    pub async fn delete_profile(
        &self,
        owner_id: &UserId,
        profile_id: &ProfileId,
    ) -> CacheResult<()> {
        let result = self.inner.store.delete_profile(profile_id).await;
        self.invalidate(Some(owner_id)).await;
        result?;
        Ok(())
    }

    /// A diagnostics snapshot of the coordinator.
    pub async fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock().await;
        let (status, owner_id, age) = match &state.slot {
            None => (CacheStatus::Empty, None, None),
            Some(entry) => {
                let status = match entry.state {
                    CacheState::Loading => CacheStatus::Loading,
                    CacheState::Ready(_) => CacheStatus::Ready,
                    CacheState::Errored(_) => CacheStatus::Errored,
                };
                (
                    status,
                    Some(entry.owner_id.clone()),
                    Some(entry.fetched_at.elapsed()),
                )
            }
        };
        CacheStats {
            status,
            owner_id,
            age,
            inflight_fetches: state.inflight.len(),
            epoch: state.epoch,
        }
    }
}

// =============================================================================
// Fetch machinery
// =============================================================================

impl CacheInner {
    /// Serves a request from the slot, an in-flight fetch, or a new fetch,
    /// in that order.
    async fn lookup(inner: &Arc<Self>, owner_id: &UserId, mut bypass_ttl: bool) -> FetchOutcome {
        loop {
            // No identity: resolve immediately, no network access. Checked
            // per iteration so a sign-out between attempts stops us too.
            if inner.identity_rx.borrow().is_none() {
                return Ok(None);
            }

            let mut rx = {
                let mut state = inner.state.lock().await;

                if !bypass_ttl
                    && let Some(entry) = &state.slot
                    && entry.is_fresh_for(owner_id, inner.config.ttl)
                {
                    match &entry.state {
                        CacheState::Ready(payload) => {
                            tracing::trace!(owner = %owner_id, "cache hit");
                            return Ok(payload.clone());
                        }
                        CacheState::Errored(error) => return Err(error.clone()),
                        // A loading entry means an in-flight fetch to
                        // attach to below.
                        CacheState::Loading => {}
                    }
                }

                let attached = state
                    .inflight
                    .get(owner_id)
                    .map(|pending| pending.tx.subscribe());
                match attached {
                    Some(rx) => {
                        tracing::trace!(owner = %owner_id, "attaching to in-flight fetch");
                        rx
                    }
                    None => Self::start_fetch(inner, &mut state, owner_id.clone()),
                }
                // The lock drops here; the fetch task settles under the
                // same lock, so our subscription strictly precedes its
                // send.
            };

            match rx.recv().await {
                Ok(outcome) => return outcome,
                // The sender vanished without an outcome reaching us: the
                // fetch was detached by an invalidation, or settled before
                // we could listen. Re-read the world.
                Err(_) => {
                    tracing::trace!(owner = %owner_id, "in-flight fetch detached, retrying lookup");
                    bypass_ttl = false;
                }
            }
        }
    }

    /// Registers and spawns a fetch for `owner_id`. Caller holds the state
    /// lock.
    fn start_fetch(
        inner: &Arc<Self>,
        state: &mut CoordinatorState,
        owner_id: UserId,
    ) -> broadcast::Receiver<FetchOutcome> {
        let (tx, rx) = broadcast::channel(1);
        state.next_fetch_id += 1;
        let fetch_id = state.next_fetch_id;
        let epoch = state.epoch;
        state.inflight.insert(
            owner_id.clone(),
            InFlightFetch {
                id: fetch_id,
                tx: tx.clone(),
            },
        );
        state.slot = Some(CacheEntry::loading(owner_id.clone()));

        tracing::debug!(owner = %owner_id, fetch_id, "starting profile fetch");
        let task_inner = Arc::clone(inner);
        tokio::spawn(async move {
            task_inner.run_fetch(owner_id, fetch_id, epoch, tx).await;
        });
        rx
    }

    /// The fetch task: coalesce, query, compose, settle.
    async fn run_fetch(
        self: Arc<Self>,
        owner_id: UserId,
        fetch_id: u64,
        epoch: u64,
        tx: broadcast::Sender<FetchOutcome>,
    ) {
        // Near-simultaneous mounts land inside this window and attach
        // instead of fetching.
        tokio::time::sleep(self.config.coalesce_delay).await;

        let outcome = self.fetch_record(&owner_id).await;

        let mut state = self.state.lock().await;

        let identity_matches = self
            .identity_rx
            .borrow()
            .as_ref()
            .is_some_and(|identity| identity.user_id == owner_id);
        let epoch_unchanged = state.epoch == epoch;

        if identity_matches && epoch_unchanged {
            state.slot = Some(CacheEntry::settled(owner_id.clone(), outcome.clone()));
        } else {
            // Stale result: never overwrite the cache. Waiters still get
            // the outcome below; they attached before the world changed.
            tracing::debug!(owner = %owner_id, "discarding fetch result for stale owner");
            // Under an unchanged epoch the Loading marker is ours to
            // clean up; after an invalidation it belongs to a newer fetch.
            if epoch_unchanged
                && state.slot.as_ref().is_some_and(|e| {
                    e.owner_id == owner_id && matches!(e.state, CacheState::Loading)
                })
            {
                state.slot = None;
            }
        }

        // Only deregister our own registration; an invalidation may have
        // replaced it with a newer fetch already.
        if state
            .inflight
            .get(&owner_id)
            .is_some_and(|pending| pending.id == fetch_id)
        {
            state.inflight.remove(&owner_id);
        }

        // Sent under the lock: anyone who saw this fetch as in-flight has
        // already subscribed.
        let _ = tx.send(outcome);
    }

    /// Queries the profile, then its listings, and composes the record.
    async fn fetch_record(&self, owner_id: &UserId) -> FetchOutcome {
        let Some(profile) = self.store.fetch_profile(owner_id).await? else {
            // Valid empty result: the row does not exist yet. Distinct
            // from a failed query, which took the error path above.
            return Ok(None);
        };
        let listings = self.store.fetch_listings(&profile.id).await?;
        Ok(Some(ProfileRecord::new(profile, listings)))
    }

    /// Reacts to identity changes: an entry owned by anyone but the
    /// current user is dropped immediately. Sign-out reaches this without
    /// debouncing, so nothing leaks into a new user's view.
    async fn run_watcher(
        weak: std::sync::Weak<Self>,
        mut identity_rx: watch::Receiver<Option<Identity>>,
    ) {
        while identity_rx.changed().await.is_ok() {
            let current = identity_rx
                .borrow_and_update()
                .as_ref()
                .map(|identity| identity.user_id.clone());
            let Some(inner) = weak.upgrade() else { break };

            let mut state = inner.state.lock().await;
            let stale = state
                .slot
                .as_ref()
                .is_some_and(|entry| Some(&entry.owner_id) != current.as_ref());
            if stale {
                state.slot = None;
                state.epoch += 1;
                tracing::debug!("cache entry dropped on identity change");
            }
        }
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        if let Some(handle) = self
            .watcher
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
