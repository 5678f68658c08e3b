//! Deterministic in-memory backend for tests.
//!
//! [`MockBackend`] implements both [`AuthGateway`] and [`RecordStore`]
//! against plain maps, with the control surface coordination tests need:
//!
//! - **Request counting**: how many calls actually reached each endpoint
//! - **Failure injection**: store faults, auth rate limiting
//! - **Latency injection**: a configurable delay on store reads, so tests
//!   can interleave other work while a fetch is "in flight"
//! - **Event injection**: push arbitrary auth-state changes, as a backend
//!   invalidating a session would

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};

use agora_core::{Identity, Listing, Profile, ProfileId, UserId};

use crate::auth::{AuthEvent, AuthGateway, Credentials, SignUpRequest};
use crate::error::{AuthError, StoreError};
use crate::store::RecordStore;
use crate::{AuthResult, StoreResult};

/// Buffered auth events per subscriber.
const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
struct Account {
    password: String,
    identity: Identity,
}

#[derive(Default)]
struct MockState {
    accounts: HashMap<String, Account>,
    session: Option<Identity>,
    profiles: HashMap<UserId, Profile>,
    listings: HashMap<ProfileId, Vec<Listing>>,
    /// Auth calls left to reject with `RateLimited` before recovering.
    auth_throttle_remaining: usize,
    /// When set, every store operation fails with a clone of this error.
    store_fault: Option<StoreError>,
    /// Injected latency for store reads.
    store_delay: Duration,
}

/// In-memory auth gateway and record store.
pub struct MockBackend {
    state: Mutex<MockState>,
    session_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    profile_fetches: AtomicUsize,
    listing_fetches: AtomicUsize,
    events_tx: broadcast::Sender<AuthEvent>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Creates an empty backend: no accounts, no session, no rows.
    #[must_use]
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(MockState::default()),
            session_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            profile_fetches: AtomicUsize::new(0),
            listing_fetches: AtomicUsize::new(0),
            events_tx,
        }
    }

    /// Creates a backend that already holds a session for `identity`.
    #[must_use]
    pub fn signed_in(identity: Identity) -> Self {
        let backend = Self::new();
        backend
            .state
            .try_lock()
            .expect("state is unshared during construction")
            .session = Some(identity);
        backend
    }

    /// Registers an account and returns the identity sign-in will produce.
    pub async fn add_account(
        &self,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Identity {
        let email = email.into();
        let identity = Identity::new(UserId::generate(), email.clone());
        self.state.lock().await.accounts.insert(
            email,
            Account {
                password: password.into(),
                identity: identity.clone(),
            },
        );
        identity
    }

    /// Inserts or replaces a profile row, bypassing the store API. Used to
    /// mutate the backend "directly", invisible to the cache.
    pub async fn put_profile(&self, profile: Profile) {
        self.state
            .lock()
            .await
            .profiles
            .insert(profile.owner_id.clone(), profile);
    }

    /// Replaces the listing rows for a profile.
    pub async fn put_listings(&self, profile_id: ProfileId, listings: Vec<Listing>) {
        self.state.lock().await.listings.insert(profile_id, listings);
    }

    /// Makes every subsequent store operation fail with `fault`, until
    /// cleared with `None`.
    pub async fn set_store_fault(&self, fault: Option<StoreError>) {
        self.state.lock().await.store_fault = fault;
    }

    /// Injects latency before every store read.
    pub async fn set_store_delay(&self, delay: Duration) {
        self.state.lock().await.store_delay = delay;
    }

    /// Rejects the next `count` auth calls with `RateLimited`.
    pub async fn throttle_auth(&self, count: usize) {
        self.state.lock().await.auth_throttle_remaining = count;
    }

    /// Pushes an auth event, as an externally-caused state change would.
    /// A `SignedOut` push also drops the held session.
    pub async fn emit(&self, event: AuthEvent) {
        if matches!(event, AuthEvent::SignedOut) {
            self.state.lock().await.session = None;
        }
        let _ = self.events_tx.send(event);
    }

    /// Number of `session` calls that reached this backend.
    #[must_use]
    pub fn session_calls(&self) -> usize {
        self.session_calls.load(Ordering::SeqCst)
    }

    /// Number of `refresh_session` calls that reached this backend.
    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Number of profile reads that reached this backend.
    #[must_use]
    pub fn profile_fetches(&self) -> usize {
        self.profile_fetches.load(Ordering::SeqCst)
    }

    /// Number of listing reads that reached this backend.
    #[must_use]
    pub fn listing_fetches(&self) -> usize {
        self.listing_fetches.load(Ordering::SeqCst)
    }

    /// Consumes one unit of auth throttle, if armed.
    async fn check_auth_throttle(&self) -> AuthResult<()> {
        let mut state = self.state.lock().await;
        if state.auth_throttle_remaining > 0 {
            state.auth_throttle_remaining -= 1;
            return Err(AuthError::rate_limited());
        }
        Ok(())
    }

    /// Applies store latency and the armed fault, if any.
    async fn check_store(&self) -> StoreResult<()> {
        let (delay, fault) = {
            let state = self.state.lock().await;
            (state.store_delay, state.store_fault.clone())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match fault {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AuthGateway for MockBackend {
    async fn session(&self) -> AuthResult<Option<Identity>> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        self.check_auth_throttle().await?;
        Ok(self.state.lock().await.session.clone())
    }

    async fn sign_in_with_password(&self, credentials: &Credentials) -> AuthResult<Identity> {
        self.check_auth_throttle().await?;
        let mut state = self.state.lock().await;
        let account = state
            .accounts
            .get(&credentials.email)
            .filter(|account| account.password == credentials.password)
            .cloned()
            .ok_or(AuthError::InvalidCredentials)?;

        state.session = Some(account.identity.clone());
        drop(state);

        let _ = self
            .events_tx
            .send(AuthEvent::SignedIn(account.identity.clone()));
        Ok(account.identity)
    }

    async fn sign_up(&self, request: &SignUpRequest) -> AuthResult<Identity> {
        self.check_auth_throttle().await?;
        let mut state = self.state.lock().await;
        if state.accounts.contains_key(&request.email) {
            return Err(AuthError::already_registered(&request.email));
        }

        let mut identity = Identity::new(UserId::generate(), request.email.clone());
        if let Some(name) = request.metadata.get("display_name").and_then(|v| v.as_str()) {
            identity = identity.with_display_name(name);
        }

        state.accounts.insert(
            request.email.clone(),
            Account {
                password: request.password.clone(),
                identity: identity.clone(),
            },
        );
        state.session = Some(identity.clone());
        drop(state);

        let _ = self.events_tx.send(AuthEvent::SignedIn(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> AuthResult<()> {
        self.state.lock().await.session = None;
        let _ = self.events_tx.send(AuthEvent::SignedOut);
        Ok(())
    }

    async fn refresh_session(&self) -> AuthResult<Option<Identity>> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.check_auth_throttle().await?;
        let session = self.state.lock().await.session.clone();
        if let Some(identity) = &session {
            let _ = self
                .events_tx
                .send(AuthEvent::TokenRefreshed(identity.clone()));
        }
        Ok(session)
    }

    fn events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events_tx.subscribe()
    }
}

#[async_trait]
impl RecordStore for MockBackend {
    async fn fetch_profile(&self, owner_id: &UserId) -> StoreResult<Option<Profile>> {
        self.profile_fetches.fetch_add(1, Ordering::SeqCst);
        self.check_store().await?;
        Ok(self.state.lock().await.profiles.get(owner_id).cloned())
    }

    async fn fetch_listings(&self, profile_id: &ProfileId) -> StoreResult<Vec<Listing>> {
        self.listing_fetches.fetch_add(1, Ordering::SeqCst);
        self.check_store().await?;
        Ok(self
            .state
            .lock()
            .await
            .listings
            .get(profile_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_profile(&self, profile: &Profile) -> StoreResult<Profile> {
        self.check_store().await?;
        let mut state = self.state.lock().await;
        if state.profiles.contains_key(&profile.owner_id) {
            return Err(StoreError::conflict(format!(
                "owner {} already has a profile",
                profile.owner_id
            )));
        }
        state
            .profiles
            .insert(profile.owner_id.clone(), profile.clone());
        Ok(profile.clone())
    }

    async fn update_profile(&self, profile: &Profile) -> StoreResult<Profile> {
        self.check_store().await?;
        let mut state = self.state.lock().await;
        let existing = state
            .profiles
            .values_mut()
            .find(|row| row.id == profile.id)
            .ok_or_else(|| StoreError::conflict("update matched no row"))?;
        *existing = profile.clone();
        Ok(profile.clone())
    }

    async fn delete_profile(&self, profile_id: &ProfileId) -> StoreResult<()> {
        self.check_store().await?;
        let mut state = self.state.lock().await;
        state.profiles.retain(|_, row| &row.id != profile_id);
        state.listings.remove(profile_id);
        Ok(())
    }
}
