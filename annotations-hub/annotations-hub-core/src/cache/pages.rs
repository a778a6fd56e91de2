use super::{push_unique, same_members, AnnotationsCache};
use crate::events::CacheEvent;
use crate::types::{AnnotationCacheId, ListCacheId};

impl AnnotationsCache {
    /// Lists the page currently belongs to, shared or not.
    pub fn get_page_list_ids(&self, normalized_page_url: &str) -> &[ListCacheId] {
        self.page_lists
            .get(normalized_page_url)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Shared lists the page currently belongs to.
    pub fn get_shared_page_list_ids(&self, normalized_page_url: &str) -> Vec<ListCacheId> {
        self.get_page_list_ids(normalized_page_url)
            .iter()
            .copied()
            .filter(|id| self.is_shared_list(id))
            .collect()
    }

    /// Replace the page's list membership and bring every shared annotation in
    /// line with it. Returns the annotations whose membership changed; calling
    /// this again with the same lists changes nothing.
    pub fn set_page_data(
        &mut self,
        normalized_page_url: &str,
        list_ids: Vec<ListCacheId>,
    ) -> Vec<AnnotationCacheId> {
        let list_ids = self.known_list_ids(list_ids);
        if list_ids.is_empty() {
            self.page_lists.remove(normalized_page_url);
        } else {
            self.page_lists
                .insert(normalized_page_url.to_string(), list_ids);
        }

        let changed = self.cascade_shared_page_lists();
        self.emit_page_data(normalized_page_url);
        if !changed.is_empty() {
            self.emit_annotations_state();
            self.emit_lists_state();
        }
        changed
    }

    /// Recompute membership of every public annotation as its page's shared
    /// lists plus its own non-shared lists, then announce any change.
    pub fn update_shared_annotations_with_shared_page_lists(&mut self) -> Vec<AnnotationCacheId> {
        let changed = self.cascade_shared_page_lists();
        if !changed.is_empty() {
            self.emit_annotations_state();
            self.emit_lists_state();
        }
        changed
    }

    /// Cascade without events. List back-references of changed annotations
    /// are reconciled before returning.
    pub(super) fn cascade_shared_page_lists(&mut self) -> Vec<AnnotationCacheId> {
        let mut changed = Vec::new();
        for id in self.annotations.ids().to_vec() {
            let Some(annotation) = self.annotations.get(&id) else {
                continue;
            };
            if !annotation.privacy_level.is_public() {
                continue;
            }
            let mut next = self.get_shared_page_list_ids(&annotation.normalized_page_url);
            for list_id in &annotation.unified_list_ids {
                if !self.is_shared_list(list_id) {
                    push_unique(&mut next, *list_id);
                }
            }
            if same_members(&next, &annotation.unified_list_ids) {
                continue;
            }

            let previous = annotation.unified_list_ids.clone();
            if let Some(annotation) = self.annotations.get_mut(&id) {
                annotation.unified_list_ids = next.clone();
            }
            self.reconcile_list_refs(id, &previous, &next);
            changed.push(id);
        }
        changed
    }

    /// Add missing page shared lists to public annotations, optionally only
    /// on one page. Unlike the cascade this never drops a membership.
    pub(super) fn join_shared_page_lists(
        &mut self,
        only_page: Option<&str>,
    ) -> Vec<AnnotationCacheId> {
        let mut changed = Vec::new();
        for id in self.annotations.ids().to_vec() {
            let Some(annotation) = self.annotations.get(&id) else {
                continue;
            };
            if !annotation.privacy_level.is_public()
                || only_page.map_or(false, |page| page != annotation.normalized_page_url)
            {
                continue;
            }
            let previous = annotation.unified_list_ids.clone();
            let mut next = previous.clone();
            let mut grew = false;
            for list_id in self.get_shared_page_list_ids(&annotation.normalized_page_url) {
                grew |= push_unique(&mut next, list_id);
            }
            if !grew {
                continue;
            }

            if let Some(annotation) = self.annotations.get_mut(&id) {
                annotation.unified_list_ids = next.clone();
            }
            self.reconcile_list_refs(id, &previous, &next);
            changed.push(id);
        }
        changed
    }

    /// Add lists to the page's membership. Returns whether anything was new.
    pub(super) fn merge_page_lists(
        &mut self,
        normalized_page_url: &str,
        list_ids: &[ListCacheId],
    ) -> bool {
        if list_ids.is_empty() {
            return false;
        }
        let entry = self
            .page_lists
            .entry(normalized_page_url.to_string())
            .or_default();
        let mut changed = false;
        for list_id in list_ids {
            changed |= push_unique(entry, *list_id);
        }
        changed
    }

    pub(super) fn emit_page_data(&self, normalized_page_url: &str) {
        self.events.send(CacheEvent::UpdatedPageData {
            normalized_page_url: normalized_page_url.to_string(),
            list_ids: self.get_page_list_ids(normalized_page_url).to_vec(),
        });
    }
}
