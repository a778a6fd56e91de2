//! Annotation privacy levels.
//!
//! The four states are totally ordered. Everything at or above
//! [`PrivacyLevel::Shared`] is publicly visible; [`PrivacyLevel::Private`] is
//! the only fully private state. The protected variants mark annotations that
//! were deliberately placed in a shared list and must not be flipped by bulk
//! share/unshare operations.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyLevel {
    #[default]
    Private,
    Protected,
    Shared,
    SharedProtected,
}

impl PrivacyLevel {
    /// Visible to others (`>= Shared`).
    pub fn is_public(self) -> bool {
        self >= PrivacyLevel::Shared
    }

    /// The single lowest state (`<= Private`).
    pub fn is_fully_private(self) -> bool {
        self <= PrivacyLevel::Private
    }

    pub fn is_protected(self) -> bool {
        matches!(self, PrivacyLevel::Protected | PrivacyLevel::SharedProtected)
    }

    /// Level after explicit attachment to a shared list.
    pub fn protect(self) -> Self {
        match self {
            PrivacyLevel::Private => PrivacyLevel::Protected,
            PrivacyLevel::Shared => PrivacyLevel::SharedProtected,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyLevel::Private => "private",
            PrivacyLevel::Protected => "protected",
            PrivacyLevel::Shared => "shared",
            PrivacyLevel::SharedProtected => "shared_protected",
        }
    }
}

impl fmt::Display for PrivacyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_matches_visibility() {
        assert!(PrivacyLevel::Private < PrivacyLevel::Protected);
        assert!(PrivacyLevel::Protected < PrivacyLevel::Shared);
        assert!(PrivacyLevel::Shared < PrivacyLevel::SharedProtected);

        assert!(!PrivacyLevel::Protected.is_public());
        assert!(PrivacyLevel::Shared.is_public());
        assert!(PrivacyLevel::SharedProtected.is_public());
        assert!(PrivacyLevel::Private.is_fully_private());
        assert!(!PrivacyLevel::Protected.is_fully_private());
    }

    #[test]
    fn protect_escalates_plain_levels_only() {
        assert_eq!(PrivacyLevel::Private.protect(), PrivacyLevel::Protected);
        assert_eq!(PrivacyLevel::Shared.protect(), PrivacyLevel::SharedProtected);
        assert_eq!(PrivacyLevel::Protected.protect(), PrivacyLevel::Protected);
        assert_eq!(
            PrivacyLevel::SharedProtected.protect(),
            PrivacyLevel::SharedProtected
        );
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&PrivacyLevel::SharedProtected).unwrap();
        assert_eq!(json, "\"shared_protected\"");
    }
}
