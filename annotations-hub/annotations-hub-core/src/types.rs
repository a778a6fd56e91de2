use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

use crate::privacy::PrivacyLevel;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid cache id: {0}")]
pub struct ParseCacheIdError(String);

/// Declares a generation-tagged cache identifier.
///
/// IDs render as `"<generation>.<seq>"`. The generation changes on every full
/// `set_*` regeneration, so an ID captured before one never resolves after it.
macro_rules! cache_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name {
            generation: u32,
            seq: u32,
        }

        impl $name {
            pub fn new(generation: u32, seq: u32) -> Self {
                Self { generation, seq }
            }

            pub fn generation(&self) -> u32 {
                self.generation
            }

            pub fn seq(&self) -> u32 {
                self.seq
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}.{}", self.generation, self.seq)
            }
        }

        impl FromStr for $name {
            type Err = ParseCacheIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let (generation, seq) = s
                    .split_once('.')
                    .ok_or_else(|| ParseCacheIdError(s.to_string()))?;
                let generation = generation
                    .parse()
                    .map_err(|_| ParseCacheIdError(s.to_string()))?;
                let seq = seq.parse().map_err(|_| ParseCacheIdError(s.to_string()))?;
                Ok(Self { generation, seq })
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

cache_id!(
    /// Cache-local identifier of an annotation.
    AnnotationCacheId
);
cache_id!(
    /// Cache-local identifier of a list.
    ListCacheId
);

/// Sequential ID source for one entity kind.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdSequence {
    generation: u32,
    next: u32,
}

impl IdSequence {
    /// Start a new generation with the counter back at zero.
    pub fn regenerate(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.next = 0;
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn next_pair(&mut self) -> (u32, u32) {
        let seq = self.next;
        self.next += 1;
        (self.generation, seq)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct UserReference {
    pub id: String,
}

impl UserReference {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Where an annotation is anchored on its page.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Selector {
    pub quote: String,
    /// Character offset of the highlighted text within the page.
    pub position: Option<u64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ListKind {
    #[default]
    UserList,
    /// Represents one shared page rather than a curated collection.
    PageLink {
        normalized_page_url: String,
        #[serde(default)]
        shared_list_entry_id: Option<String>,
        #[serde(default)]
        has_remote_annotations_to_load: bool,
    },
}

impl ListKind {
    pub fn page_url(&self) -> Option<&str> {
        match self {
            ListKind::PageLink {
                normalized_page_url,
                ..
            } => Some(normalized_page_url),
            ListKind::UserList => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnifiedAnnotation {
    pub unified_id: AnnotationCacheId,
    pub local_id: Option<String>,
    pub remote_id: Option<String>,
    pub normalized_page_url: String,
    pub body: Option<String>,
    pub comment: Option<String>,
    pub selector: Option<Selector>,
    pub creator: Option<UserReference>,
    pub created_when: DateTime<Utc>,
    pub last_edited: DateTime<Utc>,
    pub privacy_level: PrivacyLevel,
    pub unified_list_ids: Vec<ListCacheId>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnifiedList {
    pub unified_id: ListCacheId,
    pub local_id: Option<i64>,
    pub remote_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub creator: Option<UserReference>,
    pub kind: ListKind,
    pub unified_annotation_ids: Vec<AnnotationCacheId>,
}

impl UnifiedList {
    pub fn is_shared(&self) -> bool {
        self.remote_id.is_some()
    }
}

/// Annotation record as handed to the cache by a caller.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnnotationForCaching {
    pub local_id: Option<String>,
    pub remote_id: Option<String>,
    pub normalized_page_url: String,
    pub body: Option<String>,
    pub comment: Option<String>,
    pub selector: Option<Selector>,
    pub creator: Option<UserReference>,
    pub created_when: Option<DateTime<Utc>>,
    pub last_edited: Option<DateTime<Utc>>,
    pub privacy_level: PrivacyLevel,
    pub unified_list_ids: Vec<ListCacheId>,
    /// Storage IDs of lists, resolved through the reverse index on insertion.
    pub local_list_ids: Vec<i64>,
}

/// List record as handed to the cache by a caller.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ListForCaching {
    pub local_id: Option<i64>,
    pub remote_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub creator: Option<UserReference>,
    pub kind: ListKind,
    pub unified_annotation_ids: Vec<AnnotationCacheId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnotationUpdate {
    pub unified_id: AnnotationCacheId,
    pub remote_id: Option<String>,
    pub body: Option<String>,
    pub comment: Option<String>,
    pub privacy_level: PrivacyLevel,
    /// Replaces the membership wholesale when the privacy level is unchanged.
    pub unified_list_ids: Vec<ListCacheId>,
}

impl AnnotationUpdate {
    /// Start from the current state of a cached annotation.
    pub fn from_annotation(annotation: &UnifiedAnnotation) -> Self {
        Self {
            unified_id: annotation.unified_id,
            remote_id: annotation.remote_id.clone(),
            body: annotation.body.clone(),
            comment: annotation.comment.clone(),
            privacy_level: annotation.privacy_level,
            unified_list_ids: annotation.unified_list_ids.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateAnnotationOptions {
    pub update_last_edited: bool,
    pub keep_lists_if_unsharing: bool,
    pub now: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListUpdate {
    pub unified_id: ListCacheId,
    pub name: Option<String>,
    pub description: Option<String>,
    pub remote_id: Option<String>,
    pub shared_list_entry_id: Option<String>,
    pub has_remote_annotations_to_load: Option<bool>,
}

impl ListUpdate {
    pub fn new(unified_id: ListCacheId) -> Self {
        Self {
            unified_id,
            name: None,
            description: None,
            remote_id: None,
            shared_list_entry_id: None,
            has_remote_annotations_to_load: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// Timestamp used for missing `created_when`/`last_edited` values.
    pub now: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnnotationRef {
    Unified(AnnotationCacheId),
    Local(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListRef {
    Unified(ListCacheId),
    Local(i64),
}

/// Everything a backend `load` returns, in the shape the cache consumes.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheDump {
    pub lists: Vec<ListForCaching>,
    pub annotations: Vec<AnnotationForCaching>,
    /// Page URL to the storage IDs of the lists the page belongs to.
    pub pages: std::collections::BTreeMap<String, Vec<i64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_roundtrip_through_strings() {
        let id = ListCacheId::new(3, 14);
        assert_eq!(id.to_string(), "3.14");
        assert_eq!("3.14".parse::<ListCacheId>().unwrap(), id);
        assert!("314".parse::<ListCacheId>().is_err());
        assert!("a.b".parse::<AnnotationCacheId>().is_err());

        let json = serde_json::to_string(&AnnotationCacheId::new(1, 0)).unwrap();
        assert_eq!(json, "\"1.0\"");
    }

    #[test]
    fn regenerate_resets_counter() {
        let mut seq = IdSequence::default();
        assert_eq!(seq.next_pair(), (0, 0));
        assert_eq!(seq.next_pair(), (0, 1));
        seq.regenerate();
        assert_eq!(seq.next_pair(), (1, 0));
    }

    #[test]
    fn page_link_kind_deserializes_with_defaults() {
        let kind: ListKind =
            serde_json::from_str(r#"{"type":"page-link","normalized_page_url":"example.com"}"#)
                .unwrap();
        assert_eq!(kind.page_url(), Some("example.com"));
        let kind: ListKind = serde_json::from_str(r#"{"type":"user-list"}"#).unwrap();
        assert_eq!(kind, ListKind::UserList);
    }
}
