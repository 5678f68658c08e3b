//! The session controller.
//!
//! Owns the one authoritative [`Identity`] in the process. Everything else
//! observes it: UI subscribers through the event bus, the cache
//! coordinator through the published watch channel.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::{Mutex, OnceCell, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use agora_backend::AuthResult;
use agora_backend::auth::{AuthEvent, AuthGateway, Credentials, SignUpRequest};
use agora_backend::store::RecordStore;
use agora_core::{Identity, Profile, ProfileSeed};

use crate::bus::{EventBus, SessionEvent, Subscription};
use crate::config::SessionConfig;
use crate::throttle::{Backoff, RefreshThrottle};

/// Registration details: credentials plus the initial profile data the
/// sign-up form collects.
#[derive(Debug, Clone)]
pub struct SignUp {
    /// Account email.
    pub email: String,
    /// Plain-text password.
    pub password: String,
    /// Seed for the profile row created after registration.
    pub profile: ProfileSeed,
}

/// Maintains the single authoritative identity and mediates every call to
/// the auth gateway.
///
/// Cheap to clone; all clones share one identity, one throttle, and one
/// subscriber bus. Dropping the last clone stops the background event
/// pump.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    gateway: Arc<dyn AuthGateway>,
    store: Arc<dyn RecordStore>,
    /// Lock-free snapshot for reads.
    identity: ArcSwapOption<Identity>,
    /// Change feed for the cache coordinator; carries the same value as
    /// the snapshot.
    identity_tx: watch::Sender<Option<Identity>>,
    /// Resolves at most once per process lifetime.
    bootstrapped: OnceCell<()>,
    throttle: Mutex<RefreshThrottle>,
    bus: Arc<EventBus>,
    config: SessionConfig,
    pump: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    /// Creates the controller and starts its gateway event pump.
    pub fn new(
        gateway: Arc<dyn AuthGateway>,
        store: Arc<dyn RecordStore>,
        config: SessionConfig,
    ) -> Self {
        let (identity_tx, _) = watch::channel(None);
        let events = gateway.events();

        let inner = Arc::new(ControllerInner {
            gateway,
            store,
            identity: ArcSwapOption::empty(),
            identity_tx,
            bootstrapped: OnceCell::new(),
            throttle: Mutex::new(RefreshThrottle::new(
                config.min_refresh_interval,
                config.backoff_base,
                config.backoff_cap,
            )),
            bus: EventBus::new(config.debounce_window),
            config,
            pump: std::sync::Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let handle = tokio::spawn(ControllerInner::run_pump(weak, events));
        *inner
            .pump
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(handle);

        Self { inner }
    }

    /// Returns the current identity, bootstrapping it from the gateway on
    /// the first call of the process lifetime and from memory afterwards.
    pub async fn current_identity(&self) -> Option<Identity> {
        self.inner
            .bootstrapped
            .get_or_init(|| self.inner.bootstrap())
            .await;
        self.inner.snapshot()
    }

    /// Registers a handler for identity changes. Delivery is debounced for
    /// background refreshes and immediate for sign-in/sign-out; handlers
    /// run in registration order. Dropping the returned guard
    /// unsubscribes.
    pub fn subscribe(
        &self,
        handler: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.bus.subscribe(handler)
    }

    /// A change feed of the authoritative identity, for collaborators that
    /// react to it (the cache coordinator). The value is the same one
    /// [`Self::current_identity`] serves.
    pub fn identity_watch(&self) -> watch::Receiver<Option<Identity>> {
        self.inner.identity_tx.subscribe()
    }

    /// Exchanges credentials for a session. On success the identity is
    /// installed and subscribers are notified synchronously — a direct
    /// user action is never debounced.
    ///
    /// # Errors
    ///
    /// Auth errors surface to the caller for display.
    pub async fn sign_in(&self, credentials: &Credentials) -> AuthResult<Identity> {
        let identity = self.inner.gateway.sign_in_with_password(credentials).await?;
        tracing::info!(user = %identity.user_id, "sign-in succeeded");

        // The session is resolved by the sign-in itself; no bootstrap
        // fetch is owed anymore.
        let _ = self.inner.bootstrapped.set(());
        self.inner.install(Some(identity.clone()));
        self.inner
            .bus
            .deliver_now(SessionEvent::SignedIn(identity.clone()));
        Ok(identity)
    }

    /// Registers an account, installs the new identity, and issues a
    /// fire-and-forget profile-creation request. The profile insert
    /// failing does not fail the sign-up; the profile page offers a retry
    /// through the cache coordinator's write path.
    ///
    /// # Errors
    ///
    /// Auth errors surface to the caller for display.
    pub async fn sign_up(&self, sign_up: SignUp) -> AuthResult<Identity> {
        let request = SignUpRequest::new(&sign_up.email, &sign_up.password)
            .with_metadata(serde_json::json!({ "display_name": sign_up.profile.shop_name }));
        let identity = self.inner.gateway.sign_up(&request).await?;
        tracing::info!(user = %identity.user_id, "sign-up succeeded");

        let _ = self.inner.bootstrapped.set(());
        self.inner.install(Some(identity.clone()));
        self.inner
            .bus
            .deliver_now(SessionEvent::SignedIn(identity.clone()));

        let store = Arc::clone(&self.inner.store);
        let profile = Profile::from_seed(identity.user_id.clone(), &sign_up.profile);
        tokio::spawn(async move {
            if let Err(error) = store.insert_profile(&profile).await {
                tracing::warn!(owner = %profile.owner_id, %error, "initial profile insert failed");
            }
        });

        Ok(identity)
    }

    /// Ends the session. The identity is cleared and subscribers notified
    /// before the gateway round-trip — sign-out state must never wait on
    /// the network, and must never leak into a new user's view.
    pub async fn sign_out(&self) {
        let outgoing = self.inner.snapshot();
        let _ = self.inner.bootstrapped.set(());
        self.inner.install(None);
        self.inner.bus.deliver_now(SessionEvent::SignedOut);
        if let Some(identity) = outgoing {
            tracing::info!(user = %identity.user_id, "signed out");
        }

        if let Err(error) = self.inner.gateway.sign_out().await {
            // The local session is already gone; the backend one expires.
            tracing::warn!(%error, "gateway sign-out failed");
        }
    }

    /// Refreshes the session if the throttle permits, otherwise serves the
    /// last known identity silently. Plumbing for the embedding
    /// application's periodic ticks; UI consumers never need to call it.
    pub async fn refresh_if_needed(&self) {
        if let Some(delay) = self.inner.try_refresh().await {
            // Rate-limited: keep retrying on a detached task until the
            // gateway relents or the controller is dropped.
            let weak = Arc::downgrade(&self.inner);
            tokio::spawn(async move {
                let mut delay = delay;
                loop {
                    tokio::time::sleep(delay).await;
                    let Some(inner) = weak.upgrade() else { return };
                    match inner.try_refresh().await {
                        Some(next) => delay = next,
                        None => return,
                    }
                }
            });
        }
    }
}

impl ControllerInner {
    fn snapshot(&self) -> Option<Identity> {
        self.identity.load_full().map(|arc| (*arc).clone())
    }

    /// Installs a new authoritative identity into both the snapshot and
    /// the watch feed.
    fn install(&self, identity: Option<Identity>) {
        self.identity.store(identity.clone().map(Arc::new));
        self.identity_tx.send_replace(identity);
    }

    /// Applies a refreshed identity if it belongs to the signed-in user.
    /// The state machine forbids silent `SignedIn(A)` → `SignedIn(B)`
    /// moves; those only happen through an explicit sign-in.
    fn adopt_refreshed(&self, identity: Identity) {
        match self.snapshot() {
            Some(current) if current.user_id == identity.user_id => {
                self.install(Some(identity.clone()));
                self.bus.deliver_debounced(SessionEvent::Refreshed(identity));
            }
            Some(current) => {
                tracing::warn!(
                    current = %current.user_id,
                    refreshed = %identity.user_id,
                    "ignoring refresh for a different user"
                );
            }
            None => {
                tracing::debug!(user = %identity.user_id, "ignoring refresh with no local session");
            }
        }
    }

    /// One throttle-checked refresh attempt. Returns the cool-down to wait
    /// before retrying when the gateway rate-limits, `None` otherwise.
    async fn try_refresh(&self) -> Option<std::time::Duration> {
        // The lock is held across the gateway call so concurrent ticks
        // collapse into one refresh.
        let mut throttle = self.throttle.lock().await;
        if !throttle.permits(Instant::now()) {
            tracing::trace!("refresh suppressed by throttle");
            return None;
        }

        match self.gateway.refresh_session().await {
            Ok(Some(identity)) => {
                throttle.on_success(Instant::now());
                self.adopt_refreshed(identity);
                None
            }
            Ok(None) => {
                throttle.on_success(Instant::now());
                if self.snapshot().is_some() {
                    tracing::info!("session invalidated by backend");
                    self.install(None);
                    self.bus.deliver_now(SessionEvent::SignedOut);
                }
                None
            }
            Err(error) if error.is_rate_limited() => {
                let delay = throttle.on_rate_limited(Instant::now());
                tracing::warn!(
                    level = throttle.backoff_level(),
                    delay_ms = delay.as_millis() as u64,
                    "refresh rate-limited, retrying later"
                );
                Some(delay)
            }
            Err(error) => {
                // Transient failure: keep serving the last known identity.
                tracing::warn!(%error, "background refresh failed");
                None
            }
        }
    }

    /// One-time session resolution. Rate limiting is retried with
    /// exponential backoff until the gateway relents; any other failure
    /// resolves to signed-out rather than blocking the UI.
    async fn bootstrap(&self) {
        let mut backoff = Backoff::new(self.config.backoff_base, self.config.backoff_cap);
        loop {
            match self.gateway.session().await {
                Ok(identity) => {
                    match &identity {
                        Some(identity) => {
                            tracing::info!(user = %identity.user_id, "session restored")
                        }
                        None => tracing::debug!("no existing session"),
                    }
                    self.install(identity);
                    return;
                }
                Err(error) if error.is_rate_limited() => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        delay_ms = delay.as_millis() as u64,
                        "bootstrap rate-limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    tracing::warn!(%error, "bootstrap failed, treating as signed out");
                    self.install(None);
                    return;
                }
            }
        }
    }

    /// Consumes gateway events for the life of the controller.
    async fn run_pump(
        weak: std::sync::Weak<Self>,
        mut events: tokio::sync::broadcast::Receiver<AuthEvent>,
    ) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let Some(inner) = weak.upgrade() else { break };
                    inner.handle_gateway_event(event);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "auth event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn handle_gateway_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::SignedOut => {
                // Backend-invalidated session. Our own sign-out cleared the
                // identity already, making this a no-op.
                if self.snapshot().is_some() {
                    tracing::info!("gateway reported sign-out");
                    self.install(None);
                    self.bus.deliver_now(SessionEvent::SignedOut);
                }
            }
            AuthEvent::TokenRefreshed(identity) | AuthEvent::UserUpdated(identity) => {
                self.adopt_refreshed(identity);
            }
            AuthEvent::SignedIn(identity) => {
                // Direct actions install their identity synchronously; an
                // unsolicited sign-in (another tab, a console session) must
                // not swap the authoritative identity out from under the UI.
                if self.snapshot().as_ref() != Some(&identity) {
                    tracing::debug!(user = %identity.user_id, "ignoring unsolicited sign-in event");
                }
            }
        }
    }
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        if let Some(handle) = self
            .pump
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use agora_backend::AuthError;
    use agora_backend::mock::MockBackend;

    use super::*;

    fn test_config() -> SessionConfig {
        SessionConfig::default()
            .with_min_refresh_interval(Duration::from_secs(30))
            .with_debounce_window(Duration::from_millis(100))
    }

    fn controller_with(backend: Arc<MockBackend>) -> SessionController {
        SessionController::new(backend.clone(), backend, test_config())
    }

    #[tokio::test]
    async fn test_bootstrap_happens_once() {
        let backend = Arc::new(MockBackend::signed_in(Identity::new(
            "user-1",
            "a@example.com",
        )));
        let controller = controller_with(backend.clone());

        let first = controller.current_identity().await;
        let second = controller.current_identity().await;
        let third = controller.current_identity().await;

        assert_eq!(first.unwrap().user_id.as_str(), "user-1");
        assert_eq!(second, third);
        assert_eq!(backend.session_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_bootstrap_coalesces() {
        let backend = Arc::new(MockBackend::signed_in(Identity::new(
            "user-1",
            "a@example.com",
        )));
        let controller = controller_with(backend.clone());

        let (a, b, c) = tokio::join!(
            controller.current_identity(),
            controller.current_identity(),
            controller.current_identity(),
        );
        assert!(a.is_some() && b.is_some() && c.is_some());
        assert_eq!(backend.session_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_backs_off_under_rate_limiting() {
        let backend = Arc::new(MockBackend::signed_in(Identity::new(
            "user-1",
            "a@example.com",
        )));
        backend.throttle_auth(3).await;
        let controller = controller_with(backend.clone());

        // 3 limited attempts with 2s/4s/8s waits, then success.
        let identity = controller.current_identity().await;
        assert_eq!(identity.unwrap().user_id.as_str(), "user-1");
        assert_eq!(backend.session_calls(), 4);
    }

    #[tokio::test]
    async fn test_sign_in_notifies_synchronously() {
        let backend = Arc::new(MockBackend::new());
        backend.add_account("a@example.com", "pw").await;
        let controller = controller_with(backend.clone());

        let log = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let _sub = controller.subscribe(move |event| {
            sink.lock().unwrap().push(event.clone());
        });

        let identity = controller
            .sign_in(&Credentials::new("a@example.com", "pw"))
            .await
            .unwrap();

        // Delivered before sign_in returned, no debounce window involved.
        let events = log.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], SessionEvent::SignedIn(identity));
    }

    #[tokio::test]
    async fn test_sign_in_failure_surfaces() {
        let backend = Arc::new(MockBackend::new());
        backend.add_account("a@example.com", "pw").await;
        let controller = controller_with(backend);

        let err = controller
            .sign_in(&Credentials::new("a@example.com", "wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert_eq!(controller.current_identity().await, None);
    }

    #[tokio::test]
    async fn test_sign_up_survives_profile_insert_failure() {
        let backend = Arc::new(MockBackend::new());
        backend
            .set_store_fault(Some(agora_backend::StoreError::server(500, "down")))
            .await;
        let controller = controller_with(backend.clone());

        let identity = controller
            .sign_up(SignUp {
                email: "new@example.com".to_string(),
                password: "pw".to_string(),
                profile: ProfileSeed {
                    shop_name: "Acme".to_string(),
                    headline: None,
                },
            })
            .await
            .unwrap();

        assert_eq!(controller.current_identity().await, Some(identity));
    }

    #[tokio::test]
    async fn test_sign_out_clears_and_notifies_immediately() {
        let backend = Arc::new(MockBackend::signed_in(Identity::new(
            "user-1",
            "a@example.com",
        )));
        let controller = controller_with(backend);
        assert!(controller.current_identity().await.is_some());

        let log = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let _sub = controller.subscribe(move |event| {
            sink.lock().unwrap().push(event.clone());
        });

        controller.sign_out().await;

        assert_eq!(controller.current_identity().await, None);
        assert_eq!(*log.lock().unwrap(), vec![SessionEvent::SignedOut]);
        assert_eq!(*controller.identity_watch().borrow(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_throttled_locally() {
        let backend = Arc::new(MockBackend::signed_in(Identity::new(
            "user-1",
            "a@example.com",
        )));
        let controller = controller_with(backend.clone());
        controller.current_identity().await;

        controller.refresh_if_needed().await;
        controller.refresh_if_needed().await;
        controller.refresh_if_needed().await;
        assert_eq!(backend.refresh_calls(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        controller.refresh_if_needed().await;
        assert_eq!(backend.refresh_calls(), 2);
    }

    #[tokio::test]
    async fn test_backend_invalidated_session_signs_out() {
        let backend = Arc::new(MockBackend::signed_in(Identity::new(
            "user-1",
            "a@example.com",
        )));
        let controller = controller_with(backend.clone());
        controller.current_identity().await;

        backend.emit(AuthEvent::SignedOut).await;
        // Give the pump a turn to consume the event.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(controller.current_identity().await, None);
    }
}
