//! The record store trait.
//!
//! The store holds the profile entity (one row per owning user) and its
//! dependent listing rows. Reads that find nothing return `Ok(None)` or an
//! empty vector; an error always means the query itself failed.

use async_trait::async_trait;

use agora_core::{Listing, Profile, ProfileId, UserId};

use crate::StoreResult;

/// The backend record store, as this client sees it.
///
/// Implementations: [`crate::http::HttpBackend`] for the hosted REST
/// backend, [`crate::mock::MockBackend`] for tests.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetches the profile owned by `owner_id`.
    ///
    /// `Ok(None)` means no profile row exists yet — expected for accounts
    /// that registered but never completed a profile.
    ///
    /// # Errors
    ///
    /// Returns an error only when the query fails, never for a missing row.
    async fn fetch_profile(&self, owner_id: &UserId) -> StoreResult<Option<Profile>>;

    /// Fetches the listing rows belonging to `profile_id`, in store order.
    ///
    /// # Errors
    ///
    /// Returns an error only when the query fails; a profile with no
    /// listings yields an empty vector.
    async fn fetch_listings(&self, profile_id: &ProfileId) -> StoreResult<Vec<Listing>>;

    /// Inserts a new profile row and returns it as stored (the store may
    /// rewrite id and timestamps).
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::Conflict`] if the owner already has a
    /// profile, or a transport-level error.
    async fn insert_profile(&self, profile: &Profile) -> StoreResult<Profile>;

    /// Updates an existing profile row by id and returns it as stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the row does not exist or the update fails.
    async fn update_profile(&self, profile: &Profile) -> StoreResult<Profile>;

    /// Deletes a profile row by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails. Deleting an absent row is
    /// `Ok(())`.
    async fn delete_profile(&self, profile_id: &ProfileId) -> StoreResult<()>;
}
