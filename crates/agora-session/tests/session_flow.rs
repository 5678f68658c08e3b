//! Session lifecycle scenarios against the in-memory backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use agora_backend::auth::{AuthEvent, Credentials};
use agora_backend::mock::MockBackend;
use agora_core::Identity;
use agora_session::{SessionConfig, SessionController, SessionEvent};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn identity() -> Identity {
    Identity::new("user-1", "a@example.com")
}

fn recording(
    controller: &SessionController,
) -> (agora_session::Subscription, Arc<Mutex<Vec<SessionEvent>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let sub = controller.subscribe(move |event| {
        sink.lock().unwrap().push(event.clone());
    });
    (sub, log)
}

#[tokio::test(start_paused = true)]
async fn rate_limited_refresh_retries_with_backoff() {
    init_tracing();
    let backend = Arc::new(MockBackend::signed_in(identity()));
    let controller = SessionController::new(
        backend.clone(),
        backend.clone(),
        SessionConfig::default(),
    );
    controller.current_identity().await;

    // The gateway rejects the next two refreshes.
    backend.throttle_auth(2).await;
    controller.refresh_if_needed().await;
    assert_eq!(backend.refresh_calls(), 1);

    // First retry fires after the 2s backoff and is rejected again.
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(backend.refresh_calls(), 2);

    // Second retry fires after 4s more and succeeds.
    tokio::time::sleep(Duration::from_millis(4100)).await;
    assert_eq!(backend.refresh_calls(), 3);

    // The identity survived the whole episode.
    assert!(controller.current_identity().await.is_some());
}

#[tokio::test(start_paused = true)]
async fn background_refresh_events_coalesce_for_subscribers() {
    init_tracing();
    let backend = Arc::new(MockBackend::signed_in(identity()));
    let controller = SessionController::new(
        backend.clone(),
        backend.clone(),
        SessionConfig::default().with_debounce_window(Duration::from_secs(1)),
    );
    controller.current_identity().await;
    let (_sub, log) = recording(&controller);

    // A burst of gateway refresh ticks.
    for _ in 0..4 {
        backend.emit(AuthEvent::TokenRefreshed(identity())).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Inside the window: nothing delivered yet.
    assert!(log.lock().unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let events = log.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], SessionEvent::Refreshed(_)));
}

#[tokio::test(start_paused = true)]
async fn backend_sign_out_bypasses_the_debounce_window() {
    init_tracing();
    let backend = Arc::new(MockBackend::signed_in(identity()));
    let controller = SessionController::new(
        backend.clone(),
        backend.clone(),
        SessionConfig::default().with_debounce_window(Duration::from_secs(1)),
    );
    controller.current_identity().await;
    let (_sub, log) = recording(&controller);

    // A refresh tick is queued, then the backend kills the session.
    backend.emit(AuthEvent::TokenRefreshed(identity())).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    backend.emit(AuthEvent::SignedOut).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The sign-out arrived immediately, and the queued refresh for the
    // dead session was discarded with it.
    assert_eq!(*log.lock().unwrap(), vec![SessionEvent::SignedOut]);
    assert_eq!(controller.current_identity().await, None);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn refresh_for_a_different_user_is_ignored() {
    init_tracing();
    let backend = Arc::new(MockBackend::signed_in(identity()));
    let controller = SessionController::new(
        backend.clone(),
        backend.clone(),
        SessionConfig::default(),
    );
    controller.current_identity().await;
    let (_sub, log) = recording(&controller);

    // An identity can never change silently from one user to another.
    backend
        .emit(AuthEvent::TokenRefreshed(Identity::new(
            "user-2",
            "b@example.com",
        )))
        .await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(log.lock().unwrap().is_empty());
    assert_eq!(
        controller.current_identity().await.unwrap().user_id.as_str(),
        "user-1"
    );
}

#[tokio::test(start_paused = true)]
async fn sign_in_updates_the_identity_watch() {
    init_tracing();
    let backend = Arc::new(MockBackend::new());
    backend.add_account("a@example.com", "pw").await;
    let controller = SessionController::new(
        backend.clone(),
        backend.clone(),
        SessionConfig::default(),
    );

    let mut watch = controller.identity_watch();
    assert_eq!(*watch.borrow(), None);

    let identity = controller
        .sign_in(&Credentials::new("a@example.com", "pw"))
        .await
        .unwrap();

    watch.changed().await.unwrap();
    assert_eq!(watch.borrow().clone(), Some(identity));
}
