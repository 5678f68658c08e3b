//! The profile entity and its dependent listing collection.
//!
//! A [`Profile`] is the seller-facing record keyed by the owning user's id.
//! [`Listing`] rows hang off it, keyed by profile id. The cache coordinator
//! composes the two into a [`ProfileRecord`], which is the payload consumers
//! actually see.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::id::{ListingId, ProfileId, UserId};

// =============================================================================
// Profile
// =============================================================================

/// A seller profile row as stored by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Unique profile id, assigned on insert.
    pub id: ProfileId,

    /// Id of the user who owns this profile. At most one profile per owner.
    pub owner_id: UserId,

    /// Public shop name shown on listing pages.
    pub shop_name: String,

    /// Short tagline shown under the shop name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,

    /// Contact email shown to buyers, if different from the account email.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,

    /// Row creation timestamp, set by the store.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// Last update timestamp, set by the store.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Profile {
    /// Builds a fresh profile row for the given owner from seed data.
    ///
    /// The store replaces the timestamps on insert; they are filled with
    /// the current time so the row is valid before it round-trips.
    #[must_use]
    pub fn from_seed(owner_id: UserId, seed: &ProfileSeed) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: ProfileId::generate(),
            owner_id,
            shop_name: seed.shop_name.clone(),
            headline: seed.headline.clone(),
            contact_email: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Initial profile data collected at sign-up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSeed {
    /// Shop name the user picked during registration.
    pub shop_name: String,

    /// Optional tagline.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
}

// =============================================================================
// Listings
// =============================================================================

/// Publication state of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    /// Visible on the marketplace.
    Active,
    /// Saved but not yet published.
    Draft,
    /// Removed from the marketplace, kept for history.
    Archived,
}

/// A listing row belonging to a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// Unique listing id.
    pub id: ListingId,

    /// Id of the profile this listing belongs to.
    pub profile_id: ProfileId,

    /// Listing title.
    pub title: String,

    /// Asking price in minor currency units.
    pub price_cents: i64,

    /// ISO 4217 currency code.
    pub currency: String,

    /// Publication state.
    pub status: ListingStatus,

    /// Row creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Composed record
// =============================================================================

/// The composed profile payload the cache coordinator hands to consumers:
/// the profile row plus its dependent listing rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    /// The profile row.
    pub profile: Profile,

    /// Listings owned by the profile, in store order.
    pub listings: Vec<Listing>,
}

impl ProfileRecord {
    /// Composes a record from its parts.
    #[must_use]
    pub fn new(profile: Profile, listings: Vec<Listing>) -> Self {
        Self { profile, listings }
    }

    /// The user id owning this record.
    #[must_use]
    pub fn owner_id(&self) -> &UserId {
        &self.profile.owner_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed() -> ProfileSeed {
        ProfileSeed {
            shop_name: "Acme".to_string(),
            headline: Some("Quality anvils".to_string()),
        }
    }

    #[test]
    fn test_from_seed() {
        let profile = Profile::from_seed(UserId::new("user-1"), &seed());
        assert_eq!(profile.owner_id, UserId::new("user-1"));
        assert_eq!(profile.shop_name, "Acme");
        assert_eq!(profile.headline.as_deref(), Some("Quality anvils"));
    }

    #[test]
    fn test_record_owner() {
        let profile = Profile::from_seed(UserId::new("user-1"), &seed());
        let record = ProfileRecord::new(profile, Vec::new());
        assert_eq!(record.owner_id(), &UserId::new("user-1"));
        assert!(record.listings.is_empty());
    }

    #[test]
    fn test_listing_status_serde() {
        let json = serde_json::to_string(&ListingStatus::Active).unwrap();
        assert_eq!(json, "\"active\"");
        let back: ListingStatus = serde_json::from_str("\"archived\"").unwrap();
        assert_eq!(back, ListingStatus::Archived);
    }
}
