//! # agora-core
//!
//! Shared domain types for the Agora marketplace client core.
//!
//! This crate holds the types that cross crate boundaries: opaque id
//! newtypes, the authenticated [`Identity`], and the profile entity with
//! its dependent listing collection. It carries no I/O and no policy —
//! the session controller (`agora-session`) and the profile cache
//! coordinator (`agora-cache`) own all behavior.

pub mod id;
pub mod identity;
pub mod profile;

pub use id::{ListingId, ProfileId, UserId};
pub use identity::Identity;
pub use profile::{Listing, ListingStatus, Profile, ProfileRecord, ProfileSeed};
