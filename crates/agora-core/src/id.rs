//! Opaque id newtypes.
//!
//! The backend assigns all ids; this side never inspects their shape.
//! Newtypes keep a user id from being passed where a profile id belongs.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a backend-assigned id.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generates a fresh random id (client-side inserts only).
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Returns the id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

opaque_id! {
    /// Id of an authenticated user, assigned by the auth gateway.
    UserId
}

opaque_id! {
    /// Id of a profile record, assigned by the record store.
    ProfileId
}

opaque_id! {
    /// Id of a listing row belonging to a profile.
    ListingId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_roundtrip() {
        let id = UserId::new("user-1");
        assert_eq!(id.as_str(), "user-1");
        assert_eq!(id.to_string(), "user-1");
        assert_eq!(id, UserId::from("user-1"));
    }

    #[test]
    fn test_generate_is_unique() {
        assert_ne!(ProfileId::generate(), ProfileId::generate());
    }

    #[test]
    fn test_serde_transparent() {
        let id = ListingId::new("l-9");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"l-9\"");
        let back: ListingId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
