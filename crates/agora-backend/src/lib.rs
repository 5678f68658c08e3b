//! # agora-backend
//!
//! The external-collaborator seam of the Agora client core.
//!
//! The session controller and the profile cache coordinator never talk to
//! the network directly; they talk to two traits defined here:
//!
//! - [`AuthGateway`] — get-session, sign-in, sign-up, sign-out,
//!   refresh-session, plus a stream of auth-state-change events.
//! - [`RecordStore`] — CRUD over the profile entity keyed by user id, plus
//!   dependent listing rows keyed by profile id.
//!
//! ## Modules
//!
//! - [`auth`] - The auth gateway trait, request types, and auth events
//! - [`store`] - The record store trait
//! - [`error`] - `AuthError` / `StoreError` taxonomies
//! - [`http`] - reqwest transport speaking the hosted backend's REST dialect
//! - [`mock`] - deterministic in-memory backend for tests
//!
//! ## Error contract
//!
//! "No profile row found" is `Ok(None)` everywhere, never an error. The
//! transport distinguishes an empty result from a failed query structurally
//! (status code and body shape); nothing in this crate matches on error
//! message strings.

pub mod auth;
pub mod error;
pub mod http;
pub mod mock;
pub mod store;

pub use auth::{AuthEvent, AuthGateway, Credentials, SignUpRequest};
pub use error::{AuthError, StoreError};
pub use http::{HttpBackend, HttpConfig};
pub use store::RecordStore;

/// Type alias for auth gateway results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Type alias for record store results.
pub type StoreResult<T> = Result<T, StoreError>;
