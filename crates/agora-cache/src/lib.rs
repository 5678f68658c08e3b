//! # agora-cache
//!
//! The profile cache coordinator of the Agora client core.
//!
//! One [`ProfileCache`] per process owns the single cache slot mapping a
//! user id to its composed profile record, and the map of in-flight
//! fetches that makes loading single-flight. It consumes the session
//! controller's identity watch and never talks back to it — coordination
//! is strictly one-directional, which is what keeps identity changes from
//! ping-ponging into update storms.
//!
//! See [`coordinator`] for the exact lookup order (slot, in-flight fetch,
//! new coalesced fetch) and the staleness rules.

pub mod config;
pub mod coordinator;
pub mod entry;
pub mod error;

pub use config::CacheConfig;
pub use coordinator::{CacheResult, ProfileCache};
pub use entry::{CacheEntry, CacheState, CacheStats, CacheStatus};
pub use error::CacheFetchError;
