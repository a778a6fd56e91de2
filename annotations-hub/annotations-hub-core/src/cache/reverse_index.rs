use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{AnnotationCacheId, ListCacheId};

/// Maps storage and remote identifiers back to the current cache IDs.
///
/// Only the cache mutates this. Stale remote entries left behind by an update
/// are dropped on removal or on the next full regeneration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReverseIndex {
    local_annotations: HashMap<String, AnnotationCacheId>,
    remote_annotations: HashMap<String, AnnotationCacheId>,
    local_lists: HashMap<i64, ListCacheId>,
    remote_lists: HashMap<String, ListCacheId>,
}

impl ReverseIndex {
    pub fn register_annotation(
        &mut self,
        id: AnnotationCacheId,
        local_id: Option<&str>,
        remote_id: Option<&str>,
    ) {
        if let Some(local_id) = local_id {
            self.local_annotations.insert(local_id.to_string(), id);
        }
        if let Some(remote_id) = remote_id {
            self.remote_annotations.insert(remote_id.to_string(), id);
        }
    }

    pub fn register_list(
        &mut self,
        id: ListCacheId,
        local_id: Option<i64>,
        remote_id: Option<&str>,
    ) {
        if let Some(local_id) = local_id {
            self.local_lists.insert(local_id, id);
        }
        if let Some(remote_id) = remote_id {
            self.remote_lists.insert(remote_id.to_string(), id);
        }
    }

    /// Drop every entry pointing at `id`, including stale remote IDs.
    pub fn forget_annotation(&mut self, id: AnnotationCacheId) {
        self.local_annotations.retain(|_, v| *v != id);
        self.remote_annotations.retain(|_, v| *v != id);
    }

    pub fn forget_list(&mut self, id: ListCacheId) {
        self.local_lists.retain(|_, v| *v != id);
        self.remote_lists.retain(|_, v| *v != id);
    }

    pub fn clear_annotations(&mut self) {
        self.local_annotations.clear();
        self.remote_annotations.clear();
    }

    pub fn clear_lists(&mut self) {
        self.local_lists.clear();
        self.remote_lists.clear();
    }

    pub fn annotation_by_local(&self, local_id: &str) -> Option<AnnotationCacheId> {
        self.local_annotations.get(local_id).copied()
    }

    pub fn annotation_by_remote(&self, remote_id: &str) -> Option<AnnotationCacheId> {
        self.remote_annotations.get(remote_id).copied()
    }

    pub fn list_by_local(&self, local_id: i64) -> Option<ListCacheId> {
        self.local_lists.get(&local_id).copied()
    }

    pub fn list_by_remote(&self, remote_id: &str) -> Option<ListCacheId> {
        self.remote_lists.get(remote_id).copied()
    }
}
