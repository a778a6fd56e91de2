use chrono::{DateTime, Utc};

use super::{push_unique, AnnotationsCache};
use crate::error::{CacheError, Result};
use crate::events::{AnnotationsState, CacheEvent};
use crate::privacy::PrivacyLevel;
use crate::types::{
    AnnotationCacheId, AnnotationForCaching, AnnotationRef, AnnotationUpdate, CacheOptions,
    ListCacheId, UnifiedAnnotation, UpdateAnnotationOptions,
};

impl AnnotationsCache {
    /// Assign a cache ID, register reverse-index entries and resolve list
    /// membership. Explicit membership of a shared list protects the record.
    fn prepare_annotation_for_caching(
        &mut self,
        annotation: AnnotationForCaching,
        now: DateTime<Utc>,
    ) -> UnifiedAnnotation {
        let (generation, seq) = self.annotation_ids.next_pair();
        let unified_id = AnnotationCacheId::new(generation, seq);
        self.index.register_annotation(
            unified_id,
            annotation.local_id.as_deref(),
            annotation.remote_id.as_deref(),
        );

        let resolved = self.resolve_local_list_ids(&annotation.local_list_ids);
        let unified_list_ids = self.known_list_ids(
            annotation
                .unified_list_ids
                .into_iter()
                .chain(resolved),
        );

        let mut privacy_level = annotation.privacy_level;
        if unified_list_ids.iter().any(|id| self.is_shared_list(id)) {
            privacy_level = privacy_level.protect();
        }

        UnifiedAnnotation {
            unified_id,
            local_id: annotation.local_id,
            remote_id: annotation.remote_id,
            normalized_page_url: annotation.normalized_page_url,
            body: annotation.body,
            comment: annotation.comment,
            selector: annotation.selector,
            creator: annotation.creator,
            created_when: annotation.created_when.unwrap_or(now),
            last_edited: annotation.last_edited.unwrap_or(now),
            privacy_level,
            unified_list_ids,
        }
    }

    /// Replace every cached annotation. Starts a new ID generation, so IDs
    /// handed out earlier stop resolving. Returns the new IDs in input order.
    pub fn set_annotations(
        &mut self,
        annotations: Vec<AnnotationForCaching>,
        opts: CacheOptions,
    ) -> Vec<AnnotationCacheId> {
        let now = opts.now.unwrap_or_else(Utc::now);
        self.index.clear_annotations();
        self.annotation_ids.regenerate();
        for list in self.lists.values_mut() {
            list.unified_annotation_ids.clear();
        }

        let prepared: Vec<UnifiedAnnotation> = annotations
            .into_iter()
            .map(|annotation| self.prepare_annotation_for_caching(annotation, now))
            .collect();
        let ids: Vec<AnnotationCacheId> = prepared.iter().map(|a| a.unified_id).collect();

        let mut state = AnnotationsState::from_seed(prepared, |a| a.unified_id);
        let comparator = self.comparator.clone();
        state.sort_by(|a, b| comparator(a, b));
        self.annotations = state;

        for id in self.annotations.ids().to_vec() {
            let list_ids = self
                .annotations
                .get(&id)
                .map(|a| a.unified_list_ids.clone())
                .unwrap_or_default();
            self.reconcile_list_refs(id, &[], &list_ids);
        }
        self.join_shared_page_lists(None);

        self.emit_annotations_state();
        self.emit_lists_state();
        ids
    }

    /// Cache a single annotation, newest first. An annotation whose remote ID
    /// is already cached is not duplicated; the existing ID is returned.
    pub fn add_annotation(
        &mut self,
        annotation: AnnotationForCaching,
        opts: CacheOptions,
    ) -> AnnotationCacheId {
        if let Some(existing) = annotation
            .remote_id
            .as_deref()
            .and_then(|remote_id| self.index.annotation_by_remote(remote_id))
            .filter(|id| self.annotations.contains(id))
        {
            return existing;
        }

        let now = opts.now.unwrap_or_else(Utc::now);
        let mut annotation = self.prepare_annotation_for_caching(annotation, now);
        let id = annotation.unified_id;

        let mut page_changed = false;
        if annotation.privacy_level.is_public() {
            let explicit_shared: Vec<ListCacheId> = annotation
                .unified_list_ids
                .iter()
                .copied()
                .filter(|list_id| self.is_shared_list(list_id))
                .collect();
            page_changed =
                self.merge_page_lists(&annotation.normalized_page_url, &explicit_shared);
            for list_id in self.get_shared_page_list_ids(&annotation.normalized_page_url) {
                push_unique(&mut annotation.unified_list_ids, list_id);
            }
        }

        let list_ids = annotation.unified_list_ids.clone();
        let page_url = annotation.normalized_page_url.clone();
        self.annotations.push_front(id, annotation);
        let mut lists_changed = self.reconcile_list_refs(id, &[], &list_ids);
        if page_changed {
            lists_changed |= !self
                .join_shared_page_lists(Some(page_url.as_str()))
                .is_empty();
        }

        if let Some(added) = self.annotations.get(&id) {
            self.events.send(CacheEvent::AddedAnnotation {
                annotation: added.clone(),
            });
        }
        if page_changed {
            self.emit_page_data(&page_url);
        }
        self.emit_annotations_state();
        if lists_changed {
            self.emit_lists_state();
        }
        id
    }

    /// Apply an edit. Membership follows the privacy transition:
    ///
    /// - same level: membership is replaced by `update.unified_list_ids`; at a
    ///   public level the new shared lists join the page. At `Shared` every
    ///   shared sibling is then recomputed, at `SharedProtected` the page's
    ///   shared lists are kept and pushed to the public siblings;
    /// - unsharing to `Private`: shared lists are stripped, or with
    ///   `keep_lists_if_unsharing` the result is `Protected` with lists kept;
    /// - sharing from a non-public level: the page's shared lists are added;
    /// - anything else leaves membership alone.
    ///
    /// `body` and `comment` are replaced as given; `remote_id` only when set.
    pub fn update_annotation(
        &mut self,
        update: AnnotationUpdate,
        opts: UpdateAnnotationOptions,
    ) -> Result<UnifiedAnnotation> {
        let id = update.unified_id;
        let previous = self
            .annotations
            .get(&id)
            .cloned()
            .ok_or_else(|| CacheError::annotation(id))?;
        let page_url = previous.normalized_page_url.clone();
        let previous_level = previous.privacy_level;
        let mut level = update.privacy_level;
        let mut list_ids = previous.unified_list_ids.clone();
        let mut page_changed = false;
        let mut run_cascade = false;
        let mut run_join = false;

        if previous_level == level {
            list_ids = self.known_list_ids(update.unified_list_ids);
            if level.is_public() {
                let new_shared: Vec<ListCacheId> = list_ids
                    .iter()
                    .copied()
                    .filter(|list_id| self.is_shared_list(list_id))
                    .collect();
                page_changed = self.merge_page_lists(&page_url, &new_shared);
                if level == PrivacyLevel::Shared {
                    run_cascade = true;
                } else {
                    for list_id in self.get_shared_page_list_ids(&page_url) {
                        push_unique(&mut list_ids, list_id);
                    }
                    run_join = page_changed;
                }
            }
        } else if !previous_level.is_fully_private() && level.is_fully_private() {
            if opts.keep_lists_if_unsharing {
                level = PrivacyLevel::Protected;
            } else {
                list_ids.retain(|list_id| !self.is_shared_list(list_id));
            }
        } else if !previous_level.is_public() && level.is_public() {
            for list_id in self.get_shared_page_list_ids(&page_url) {
                push_unique(&mut list_ids, list_id);
            }
        }

        if level.is_fully_private() && list_ids.iter().any(|id| self.is_shared_list(id)) {
            level = level.protect();
        }

        let mut next = previous.clone();
        next.privacy_level = level;
        next.unified_list_ids = list_ids;
        next.body = update.body;
        next.comment = update.comment;
        if let Some(remote_id) = update.remote_id {
            if previous.remote_id.as_deref() != Some(remote_id.as_str()) {
                self.index.register_annotation(id, None, Some(remote_id.as_str()));
            }
            next.remote_id = Some(remote_id);
        }
        if opts.update_last_edited {
            next.last_edited = opts.now.unwrap_or_else(Utc::now);
        }

        let after = next.unified_list_ids.clone();
        self.annotations.replace(id, next);
        let mut lists_changed = self.reconcile_list_refs(id, &previous.unified_list_ids, &after);
        if run_cascade {
            lists_changed |= !self.cascade_shared_page_lists().is_empty();
        } else if run_join {
            lists_changed |= !self
                .join_shared_page_lists(Some(page_url.as_str()))
                .is_empty();
        }

        let updated = self
            .annotations
            .get(&id)
            .cloned()
            .ok_or_else(|| CacheError::annotation(id))?;
        self.events.send(CacheEvent::UpdatedAnnotation {
            annotation: updated.clone(),
        });
        if page_changed {
            self.emit_page_data(&page_url);
        }
        self.emit_annotations_state();
        if lists_changed {
            self.emit_lists_state();
        }
        Ok(updated)
    }

    pub fn remove_annotation(&mut self, by: AnnotationRef) -> Result<UnifiedAnnotation> {
        let id = match by {
            AnnotationRef::Unified(id) => id,
            AnnotationRef::Local(local_id) => self
                .index
                .annotation_by_local(&local_id)
                .ok_or(CacheError::AnnotationNotFound(local_id))?,
        };
        let removed = self
            .annotations
            .remove(&id)
            .ok_or_else(|| CacheError::annotation(id))?;
        self.index.forget_annotation(id);
        let lists_changed = self.reconcile_list_refs(id, &removed.unified_list_ids, &[]);

        self.events.send(CacheEvent::RemovedAnnotation {
            annotation: removed.clone(),
        });
        self.emit_annotations_state();
        if lists_changed {
            self.emit_lists_state();
        }
        Ok(removed)
    }
}
