//! # agora-session
//!
//! The session controller of the Agora client core.
//!
//! One [`SessionController`] per process owns the authoritative
//! [`agora_core::Identity`] and mediates every auth gateway call:
//!
//! - **Bootstrap-once**: the first `current_identity` call resolves the
//!   session from the gateway; every later call is served from memory.
//! - **Refresh throttling**: refreshes inside `min_refresh_interval` never
//!   reach the backend; rate-limit responses back off exponentially.
//! - **Debounced fan-out**: chatty background events coalesce to one
//!   notification per window; sign-in and sign-out always fire
//!   immediately.
//!
//! Collaborators that must react to identity changes (the profile cache
//! coordinator) consume [`SessionController::identity_watch`]; the flow of
//! information is strictly controller → coordinator.

pub mod bus;
pub mod config;
pub mod controller;
mod throttle;

pub use bus::{SessionEvent, Subscription};
pub use config::SessionConfig;
pub use controller::{SessionController, SignUp};
