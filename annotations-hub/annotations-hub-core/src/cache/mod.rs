//! Unified annotation/list cache.
//!
//! Annotations and lists are normalized under generation-tagged cache IDs and
//! cross-referenced in both directions. Every public mutation restores the
//! privacy and membership invariants before any event is sent:
//!
//! 1. list IDs held by annotations (and annotation IDs held by lists) exist;
//! 2. the annotation/list links are symmetric;
//! 3. every local/remote ID resolves through the reverse index;
//! 4. a fully private annotation never sits in a shared list;
//! 5. a public annotation always belongs to its page's shared lists.
//!
//! The cache performs no I/O. Callers persist through a backend first (or
//! optimistically, see [`crate::sharing::AnnotationsController`]) and feed the
//! canonical records in here.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::events::{AnnotationsState, CacheEvent, EventBus, ListsState};
use crate::types::{
    AnnotationCacheId, CacheDump, CacheOptions, IdSequence, ListCacheId, UnifiedAnnotation,
    UnifiedList,
};

mod annotations;
mod invariants;
mod lists;
mod pages;
mod reverse_index;

pub use reverse_index::ReverseIndex;


pub type AnnotationComparator =
    Arc<dyn Fn(&UnifiedAnnotation, &UnifiedAnnotation) -> Ordering + Send + Sync>;

/// Orders annotations by where they sit on the page, unanchored ones last.
/// Ties fall back to newest first.
pub fn sort_by_page_position(a: &UnifiedAnnotation, b: &UnifiedAnnotation) -> Ordering {
    let position = |x: &UnifiedAnnotation| x.selector.as_ref().and_then(|s| s.position);
    let by_position = match (position(a), position(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_position.then_with(|| b.created_when.cmp(&a.created_when))
}

pub struct CacheBuilder {
    config: CacheConfig,
    comparator: Option<AnnotationComparator>,
    events: Option<EventBus>,
}

impl CacheBuilder {
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            comparator: None,
            events: None,
        }
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn comparator<F>(mut self, comparator: F) -> Self
    where
        F: Fn(&UnifiedAnnotation, &UnifiedAnnotation) -> Ordering + Send + Sync + 'static,
    {
        self.comparator = Some(Arc::new(comparator));
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> AnnotationsCache {
        let events = self
            .events
            .unwrap_or_else(|| EventBus::with_capacity(self.config.event_capacity));
        AnnotationsCache {
            comparator: self
                .comparator
                .unwrap_or_else(|| Arc::new(sort_by_page_position)),
            events,
            config: self.config,
            annotations: AnnotationsState::new(),
            lists: ListsState::new(),
            page_lists: HashMap::new(),
            index: ReverseIndex::default(),
            annotation_ids: IdSequence::default(),
            list_ids: IdSequence::default(),
        }
    }
}

impl Default for CacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of all cache state, used to roll back optimistic edits.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheSnapshot {
    annotations: AnnotationsState,
    lists: ListsState,
    page_lists: HashMap<String, Vec<ListCacheId>>,
    index: ReverseIndex,
    annotation_ids: IdSequence,
    list_ids: IdSequence,
}

pub struct AnnotationsCache {
    config: CacheConfig,
    comparator: AnnotationComparator,
    events: EventBus,
    annotations: AnnotationsState,
    lists: ListsState,
    /// Normalized page URL to the lists the page belongs to.
    page_lists: HashMap<String, Vec<ListCacheId>>,
    index: ReverseIndex,
    annotation_ids: IdSequence,
    list_ids: IdSequence,
}

impl fmt::Debug for AnnotationsCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotationsCache")
            .field("config", &self.config)
            .field("annotations", &self.annotations.len())
            .field("lists", &self.lists.len())
            .field("pages", &self.page_lists.len())
            .field("annotation_ids", &self.annotation_ids)
            .field("list_ids", &self.list_ids)
            .finish_non_exhaustive()
    }
}

impl AnnotationsCache {
    pub fn new(config: CacheConfig) -> Self {
        CacheBuilder::new().config(config).build()
    }

    pub fn builder() -> CacheBuilder {
        CacheBuilder::new()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    pub fn annotations(&self) -> &AnnotationsState {
        &self.annotations
    }

    pub fn lists(&self) -> &ListsState {
        &self.lists
    }

    pub fn get_annotation(&self, id: AnnotationCacheId) -> Option<&UnifiedAnnotation> {
        self.annotations.get(&id)
    }

    pub fn get_annotation_by_local_id(&self, local_id: &str) -> Option<&UnifiedAnnotation> {
        self.index
            .annotation_by_local(local_id)
            .and_then(|id| self.annotations.get(&id))
    }

    pub fn get_annotation_by_remote_id(&self, remote_id: &str) -> Option<&UnifiedAnnotation> {
        self.index
            .annotation_by_remote(remote_id)
            .and_then(|id| self.annotations.get(&id))
    }

    pub fn get_list(&self, id: ListCacheId) -> Option<&UnifiedList> {
        self.lists.get(&id)
    }

    pub fn get_list_by_local_id(&self, local_id: i64) -> Option<&UnifiedList> {
        self.index
            .list_by_local(local_id)
            .and_then(|id| self.lists.get(&id))
    }

    pub fn get_list_by_remote_id(&self, remote_id: &str) -> Option<&UnifiedList> {
        self.index
            .list_by_remote(remote_id)
            .and_then(|id| self.lists.get(&id))
    }

    /// All annotations ordered by the configured comparator.
    pub fn get_annotations_array(&self) -> Vec<&UnifiedAnnotation> {
        let mut out: Vec<_> = self.annotations.iter().collect();
        out.sort_by(|a, b| (self.comparator)(*a, *b));
        out
    }

    pub fn sort_lists(&mut self) -> Result<()> {
        Err(CacheError::Unimplemented("sort_lists"))
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            annotations: self.annotations.clone(),
            lists: self.lists.clone(),
            page_lists: self.page_lists.clone(),
            index: self.index.clone(),
            annotation_ids: self.annotation_ids.clone(),
            list_ids: self.list_ids.clone(),
        }
    }

    /// Replace all state with `snapshot` and announce both collections.
    pub fn restore(&mut self, snapshot: CacheSnapshot) {
        self.annotations = snapshot.annotations;
        self.lists = snapshot.lists;
        self.page_lists = snapshot.page_lists;
        self.index = snapshot.index;
        self.annotation_ids = snapshot.annotation_ids;
        self.list_ids = snapshot.list_ids;
        self.emit_annotations_state();
        self.emit_lists_state();
    }

    /// Rebuild the whole cache from a backend load.
    pub fn load_dump(&mut self, dump: CacheDump, opts: CacheOptions) {
        self.set_lists(dump.lists);
        self.set_annotations(dump.annotations, opts);
        for (page_url, local_list_ids) in dump.pages {
            let list_ids = self.resolve_local_list_ids(&local_list_ids);
            self.set_page_data(&page_url, list_ids);
        }
    }

    fn emit_annotations_state(&self) {
        self.events.send(CacheEvent::NewAnnotationsState {
            state: Arc::new(self.annotations.clone()),
        });
    }

    fn emit_lists_state(&self) {
        self.events.send(CacheEvent::NewListsState {
            state: Arc::new(self.lists.clone()),
        });
    }

    fn is_shared_list(&self, id: &ListCacheId) -> bool {
        self.lists.get(id).map_or(false, UnifiedList::is_shared)
    }

    /// Map storage list IDs to cache IDs, dropping the ones not loaded yet.
    fn resolve_local_list_ids(&self, local_ids: &[i64]) -> Vec<ListCacheId> {
        let mut out = Vec::with_capacity(local_ids.len());
        for local_id in local_ids {
            match self.index.list_by_local(*local_id) {
                Some(id) => {
                    push_unique(&mut out, id);
                }
                None => {
                    if self.config.debug {
                        tracing::warn!(
                            local_list_id = *local_id,
                            "no cached list for local list ID"
                        );
                    }
                }
            }
        }
        out
    }

    /// Keep only list IDs that exist in the list container, without duplicates.
    fn known_list_ids(&self, ids: impl IntoIterator<Item = ListCacheId>) -> Vec<ListCacheId> {
        let mut out = Vec::new();
        for id in ids {
            if self.lists.contains(&id) {
                push_unique(&mut out, id);
            } else if self.config.debug {
                tracing::warn!(list_id = %id, "dropping reference to uncached list");
            }
        }
        out
    }

    /// Bring list-side back-references in line with an annotation's membership
    /// change. Returns whether any list was touched.
    fn reconcile_list_refs(
        &mut self,
        annotation_id: AnnotationCacheId,
        before: &[ListCacheId],
        after: &[ListCacheId],
    ) -> bool {
        let mut changed = false;
        for list_id in before.iter().filter(|id| !after.contains(id)) {
            if let Some(list) = self.lists.get_mut(list_id) {
                let len = list.unified_annotation_ids.len();
                list.unified_annotation_ids.retain(|id| *id != annotation_id);
                changed |= list.unified_annotation_ids.len() != len;
            }
        }
        for list_id in after.iter().filter(|id| !before.contains(id)) {
            if let Some(list) = self.lists.get_mut(list_id) {
                changed |= push_unique(&mut list.unified_annotation_ids, annotation_id);
            }
        }
        changed
    }
}

/// Append `item` unless already present. Returns whether it was added.
fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) -> bool {
    if items.contains(&item) {
        false
    } else {
        items.push(item);
        true
    }
}

fn same_members<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    a.len() == b.len() && a.iter().all(|x| b.contains(x))
}
