//! The authenticated identity.

use serde::{Deserialize, Serialize};

use crate::id::UserId;

/// The authoritative record of which user, if any, is currently
/// authenticated.
///
/// Created on successful sign-in/sign-up, destroyed on sign-out or when the
/// backend invalidates the session. Exactly one `Identity` (or none) is
/// authoritative at any instant; the session controller owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque user id assigned by the auth gateway.
    pub user_id: UserId,

    /// Email address the user authenticated with.
    pub email: String,

    /// Optional display name from the gateway's user metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Identity {
    /// Creates an identity with the minimal claims this core tracks.
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            display_name: None,
        }
    }

    /// Sets the display name claim.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Returns `true` if this identity belongs to the given user.
    #[must_use]
    pub fn is(&self, user_id: &UserId) -> bool {
        &self.user_id == user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is() {
        let identity = Identity::new("user-1", "a@example.com");
        assert!(identity.is(&UserId::new("user-1")));
        assert!(!identity.is(&UserId::new("user-2")));
    }

    #[test]
    fn test_display_name_skipped_when_absent() {
        let identity = Identity::new("user-1", "a@example.com");
        let json = serde_json::to_value(&identity).unwrap();
        assert!(json.get("display_name").is_none());

        let identity = identity.with_display_name("Acme");
        let json = serde_json::to_value(&identity).unwrap();
        assert_eq!(json["display_name"], "Acme");
    }
}
