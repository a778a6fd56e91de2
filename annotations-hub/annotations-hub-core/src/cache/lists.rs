use super::{push_unique, AnnotationsCache};
use crate::error::{CacheError, Result};
use crate::events::{CacheEvent, ListsState};
use crate::types::{
    AnnotationCacheId, ListCacheId, ListForCaching, ListKind, ListRef, ListUpdate, UnifiedList,
};

impl AnnotationsCache {
    /// Assign a cache ID and register reverse-index entries. A shared list
    /// also picks up every public annotation by the same creator.
    ///
    /// Returns the prepared list and the annotation IDs the caller attached
    /// explicitly.
    fn prepare_list_for_caching(
        &mut self,
        list: ListForCaching,
    ) -> (UnifiedList, Vec<AnnotationCacheId>) {
        let (generation, seq) = self.list_ids.next_pair();
        let unified_id = ListCacheId::new(generation, seq);
        self.index
            .register_list(unified_id, list.local_id, list.remote_id.as_deref());

        let mut explicit = Vec::new();
        for annotation_id in list.unified_annotation_ids {
            if self.annotations.contains(&annotation_id) {
                push_unique(&mut explicit, annotation_id);
            } else if self.config.debug {
                tracing::warn!(
                    annotation_id = %annotation_id,
                    "dropping reference to uncached annotation"
                );
            }
        }

        let mut unified_annotation_ids = explicit.clone();
        if list.remote_id.is_some() {
            for annotation in self.annotations.iter() {
                if annotation.privacy_level.is_public() && annotation.creator == list.creator {
                    push_unique(&mut unified_annotation_ids, annotation.unified_id);
                }
            }
        }

        let prepared = UnifiedList {
            unified_id,
            local_id: list.local_id,
            remote_id: list.remote_id,
            name: list.name,
            description: list.description,
            creator: list.creator,
            kind: list.kind,
            unified_annotation_ids,
        };
        (prepared, explicit)
    }

    /// Mirror a freshly inserted list's members on the annotation side.
    /// Annotations attached explicitly to a shared list are protected.
    fn link_list_members(&mut self, list_id: ListCacheId, explicit: &[AnnotationCacheId]) -> bool {
        let Some(list) = self.lists.get(&list_id) else {
            return false;
        };
        let shared = list.is_shared();
        let members = list.unified_annotation_ids.clone();

        let mut changed = false;
        for annotation_id in members {
            let Some(annotation) = self.annotations.get_mut(&annotation_id) else {
                continue;
            };
            changed |= push_unique(&mut annotation.unified_list_ids, list_id);
            if shared && explicit.contains(&annotation_id) {
                let protected = annotation.privacy_level.protect();
                changed |= protected != annotation.privacy_level;
                annotation.privacy_level = protected;
            }
        }
        changed
    }

    /// Replace every cached list. Starts a new list ID generation; list IDs
    /// held by annotations and the page table are dropped with it.
    pub fn set_lists(&mut self, lists: Vec<ListForCaching>) -> Vec<ListCacheId> {
        self.index.clear_lists();
        self.list_ids.regenerate();
        self.page_lists.clear();
        for annotation in self.annotations.values_mut() {
            annotation.unified_list_ids.clear();
        }
        self.lists = ListsState::new();

        let mut ids = Vec::with_capacity(lists.len());
        for list in lists {
            let (prepared, explicit) = self.prepare_list_for_caching(list);
            let id = prepared.unified_id;
            let page_url = prepared.kind.page_url().map(str::to_string);
            self.lists.push(id, prepared);
            self.link_list_members(id, &explicit);
            if let Some(page_url) = page_url {
                self.merge_page_lists(&page_url, &[id]);
            }
            ids.push(id);
        }
        self.join_shared_page_lists(None);

        self.emit_lists_state();
        self.emit_annotations_state();
        ids
    }

    /// Cache a single list. A page-link list also joins its page.
    pub fn add_list(&mut self, list: ListForCaching) -> ListCacheId {
        let (prepared, explicit) = self.prepare_list_for_caching(list);
        let id = prepared.unified_id;
        let page_url = prepared.kind.page_url().map(str::to_string);
        self.lists.push(id, prepared);
        let mut annotations_changed = self.link_list_members(id, &explicit);

        let mut page_changed = false;
        if let Some(page_url) = &page_url {
            page_changed = self.merge_page_lists(page_url, &[id]);
            if page_changed {
                annotations_changed |= !self
                    .join_shared_page_lists(Some(page_url.as_str()))
                    .is_empty();
            }
        }

        if let Some(added) = self.lists.get(&id) {
            self.events.send(CacheEvent::AddedList { list: added.clone() });
        }
        if let (true, Some(page_url)) = (page_changed, &page_url) {
            self.emit_page_data(page_url);
        }
        self.emit_lists_state();
        if annotations_changed {
            self.emit_annotations_state();
        }
        id
    }

    /// Merge changed fields into a cached list. When the list gains its first
    /// remote ID it is now shared: fully private members become protected and
    /// public annotations are re-cascaded against their pages.
    pub fn update_list(&mut self, update: ListUpdate) -> Result<UnifiedList> {
        let id = update.unified_id;
        let previous = self
            .lists
            .get(&id)
            .cloned()
            .ok_or_else(|| CacheError::list(id))?;

        let mut next = previous.clone();
        if let Some(name) = update.name {
            next.name = name;
        }
        if let Some(description) = update.description {
            next.description = Some(description);
        }
        if let ListKind::PageLink {
            shared_list_entry_id,
            has_remote_annotations_to_load,
            ..
        } = &mut next.kind
        {
            if let Some(entry_id) = update.shared_list_entry_id {
                *shared_list_entry_id = Some(entry_id);
            }
            if let Some(has_remote) = update.has_remote_annotations_to_load {
                *has_remote_annotations_to_load = has_remote;
            }
        }
        let became_shared = previous.remote_id.is_none() && update.remote_id.is_some();
        if let Some(remote_id) = update.remote_id {
            if previous.remote_id.as_deref() != Some(remote_id.as_str()) {
                self.index.register_list(id, None, Some(remote_id.as_str()));
            }
            next.remote_id = Some(remote_id);
        }
        self.lists.replace(id, next);

        let mut annotations_changed = false;
        let mut joined_pages = Vec::new();
        if became_shared {
            let mut member_pages = Vec::new();
            for annotation_id in &previous.unified_annotation_ids {
                if let Some(annotation) = self.annotations.get_mut(annotation_id) {
                    if annotation.privacy_level.is_fully_private() {
                        annotation.privacy_level = annotation.privacy_level.protect();
                        annotations_changed = true;
                    }
                    push_unique(&mut member_pages, annotation.normalized_page_url.clone());
                }
            }
            // pages of member annotations belong to the list
            member_pages.retain(|page_url| self.merge_page_lists(page_url, &[id]));
            joined_pages = member_pages;
            annotations_changed |= !self.cascade_shared_page_lists().is_empty();
        }

        let updated = self
            .lists
            .get(&id)
            .cloned()
            .ok_or_else(|| CacheError::list(id))?;
        self.events.send(CacheEvent::UpdatedList {
            list: updated.clone(),
        });
        for page_url in &joined_pages {
            self.emit_page_data(page_url);
        }
        self.emit_lists_state();
        if annotations_changed {
            self.emit_annotations_state();
        }
        Ok(updated)
    }

    pub fn remove_list(&mut self, by: ListRef) -> Result<UnifiedList> {
        let id = match by {
            ListRef::Unified(id) => id,
            ListRef::Local(local_id) => self
                .index
                .list_by_local(local_id)
                .ok_or_else(|| CacheError::ListNotFound(local_id.to_string()))?,
        };
        let removed = self.lists.remove(&id).ok_or_else(|| CacheError::list(id))?;
        self.index.forget_list(id);

        let mut annotations_changed = false;
        for annotation_id in &removed.unified_annotation_ids {
            if let Some(annotation) = self.annotations.get_mut(annotation_id) {
                annotation.unified_list_ids.retain(|list_id| *list_id != id);
                annotations_changed = true;
            }
        }
        let mut touched_pages = Vec::new();
        for (page_url, list_ids) in self.page_lists.iter_mut() {
            let len = list_ids.len();
            list_ids.retain(|list_id| *list_id != id);
            if list_ids.len() != len {
                touched_pages.push(page_url.clone());
            }
        }
        self.page_lists.retain(|_, list_ids| !list_ids.is_empty());
        touched_pages.sort();

        self.events.send(CacheEvent::RemovedList {
            list: removed.clone(),
        });
        for page_url in &touched_pages {
            self.emit_page_data(page_url);
        }
        self.emit_lists_state();
        if annotations_changed {
            self.emit_annotations_state();
        }
        Ok(removed)
    }
}
