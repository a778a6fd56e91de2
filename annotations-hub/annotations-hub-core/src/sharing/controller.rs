use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use super::{AnnotationsBackend, ContentSharingBackend, ListsBackend, RemoteIdAllocator};
use crate::cache::{AnnotationsCache, CacheSnapshot};
use crate::error::CacheError;
use crate::events::CacheEvent;
use crate::privacy::PrivacyLevel;
use crate::types::{
    AnnotationCacheId, AnnotationForCaching, AnnotationRef, AnnotationUpdate, CacheOptions,
    ListCacheId, ListForCaching, ListRef, ListUpdate, UnifiedAnnotation, UnifiedList,
    UpdateAnnotationOptions,
};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("backend call failed: {0}")]
    Backend(#[from] anyhow::Error),
    #[error("{0} has not been persisted locally")]
    NotPersisted(String),
}

pub type Result<T> = std::result::Result<T, ControllerError>;

/// Keeps the cache and the backends in step.
///
/// Creation waits for the backend so the cache only ever sees persisted
/// records. Edits are applied to the cache first and rolled back from a
/// snapshot when the backend refuses them. When a multi-step backend write
/// fails part way, the steps that already landed are undone as well.
///
/// Operations run one at a time: each holds the op guard from its snapshot
/// until the backend has answered, so a rollback never discards another
/// operation's edit. The cache lock itself is never held across an `.await`.
pub struct AnnotationsController {
    cache: Arc<Mutex<AnnotationsCache>>,
    annotations: Arc<dyn AnnotationsBackend>,
    lists: Arc<dyn ListsBackend>,
    sharing: Arc<dyn ContentSharingBackend>,
    ids: Arc<dyn RemoteIdAllocator>,
    ops: tokio::sync::Mutex<()>,
}

impl AnnotationsController {
    pub fn new(
        cache: Arc<Mutex<AnnotationsCache>>,
        annotations: Arc<dyn AnnotationsBackend>,
        lists: Arc<dyn ListsBackend>,
        sharing: Arc<dyn ContentSharingBackend>,
        ids: Arc<dyn RemoteIdAllocator>,
    ) -> Self {
        Self {
            cache,
            annotations,
            lists,
            sharing,
            ids,
            ops: tokio::sync::Mutex::new(()),
        }
    }

    /// Use one backend for every collaborator role.
    pub fn with_backend<B>(cache: Arc<Mutex<AnnotationsCache>>, backend: Arc<B>) -> Self
    where
        B: AnnotationsBackend
            + ListsBackend
            + ContentSharingBackend
            + RemoteIdAllocator
            + 'static,
    {
        Self::new(
            cache,
            backend.clone(),
            backend.clone(),
            backend.clone(),
            backend,
        )
    }

    pub fn cache(&self) -> &Arc<Mutex<AnnotationsCache>> {
        &self.cache
    }

    /// Persist an annotation, share it when public, then cache it. If a
    /// follow-up step fails the persisted annotation is deleted again.
    pub async fn create_annotation(
        &self,
        annotation: AnnotationForCaching,
    ) -> Result<AnnotationCacheId> {
        let _op = self.ops.lock().await;
        let local_id = self.annotations.create_annotation(&annotation).await?;
        let remote_id = match self.finish_creation(&local_id, &annotation).await {
            Ok(remote_id) => remote_id,
            Err(e) => {
                warn!(local_id = %local_id, error = %e, "creation failed, deleting annotation");
                if let Err(undo) = self.annotations.delete_annotation(&local_id).await {
                    warn!(local_id = %local_id, error = %undo, "could not delete annotation");
                }
                return Err(e.into());
            }
        };

        let id = self.cache.lock().add_annotation(
            AnnotationForCaching {
                local_id: Some(local_id.clone()),
                remote_id,
                ..annotation
            },
            CacheOptions::default(),
        );
        info!(local_id = %local_id, unified_id = %id, "created annotation");
        Ok(id)
    }

    /// List memberships and the remote share of a freshly persisted
    /// annotation. Returns the remote ID to cache.
    async fn finish_creation(
        &self,
        local_id: &str,
        annotation: &AnnotationForCaching,
    ) -> anyhow::Result<Option<String>> {
        for local_list_id in &annotation.local_list_ids {
            self.lists
                .add_annotation_to_list(*local_list_id, local_id)
                .await?;
        }
        if annotation.privacy_level.is_public() {
            return Ok(Some(self.sharing.share_annotation(local_id).await?));
        }
        Ok(annotation.remote_id.clone())
    }

    pub async fn create_list(&self, list: ListForCaching) -> Result<ListCacheId> {
        let _op = self.ops.lock().await;
        let local_id = self
            .lists
            .create_list(&list.name, list.description.as_deref())
            .await?;
        let id = self.cache.lock().add_list(ListForCaching {
            local_id: Some(local_id),
            ..list
        });
        info!(local_list_id = local_id, unified_id = %id, "created list");
        Ok(id)
    }

    /// Share a list remotely and record its remote ID in the cache.
    pub async fn share_list(&self, list_id: ListCacheId) -> Result<UnifiedList> {
        let _op = self.ops.lock().await;
        let local_id = self.list_local_id(list_id)?;
        let remote_id = self.sharing.share_list(local_id).await?;
        let updated = self.cache.lock().update_list(ListUpdate {
            remote_id: Some(remote_id),
            ..ListUpdate::new(list_id)
        })?;
        Ok(updated)
    }

    pub async fn edit_comment(
        &self,
        annotation_id: AnnotationCacheId,
        comment: Option<String>,
    ) -> Result<UnifiedAnnotation> {
        let _op = self.ops.lock().await;
        let (snapshot, local_id, updated) = {
            let mut cache = self.cache.lock();
            let current = cache
                .get_annotation(annotation_id)
                .ok_or_else(|| CacheError::annotation(annotation_id))?;
            let local_id = annotation_local_id(current)?;
            let update = AnnotationUpdate {
                comment: comment.clone(),
                ..AnnotationUpdate::from_annotation(current)
            };
            let snapshot = cache.snapshot();
            let updated = cache.update_annotation(
                update,
                UpdateAnnotationOptions {
                    update_last_edited: true,
                    ..Default::default()
                },
            )?;
            (snapshot, local_id, updated)
        };

        let result = self
            .annotations
            .edit_annotation(&local_id, comment.as_deref())
            .await;
        self.settle("edit_comment", snapshot, result)?;
        Ok(updated)
    }

    /// Change privacy. Going public shares the annotation remotely; going
    /// fully private without keeping lists unshares it.
    pub async fn set_privacy_level(
        &self,
        annotation_id: AnnotationCacheId,
        level: PrivacyLevel,
        keep_lists_if_unsharing: bool,
    ) -> Result<UnifiedAnnotation> {
        let _op = self.ops.lock().await;
        let (snapshot, local_id, previous, updated) = {
            let mut cache = self.cache.lock();
            let current = cache
                .get_annotation(annotation_id)
                .ok_or_else(|| CacheError::annotation(annotation_id))?;
            let local_id = annotation_local_id(current)?;
            let previous = current.privacy_level;
            let update = AnnotationUpdate {
                privacy_level: level,
                ..AnnotationUpdate::from_annotation(current)
            };
            let snapshot = cache.snapshot();
            let updated = cache.update_annotation(
                update,
                UpdateAnnotationOptions {
                    keep_lists_if_unsharing,
                    ..Default::default()
                },
            )?;
            (snapshot, local_id, previous, updated)
        };

        let result = self
            .sync_privacy(&local_id, previous, &updated)
            .await;
        let remote_id = self.settle("set_privacy_level", snapshot, result)?;

        match remote_id {
            Some(remote_id) => {
                let mut cache = self.cache.lock();
                let current = cache
                    .get_annotation(annotation_id)
                    .ok_or_else(|| CacheError::annotation(annotation_id))?;
                let update = AnnotationUpdate {
                    remote_id: Some(remote_id),
                    ..AnnotationUpdate::from_annotation(current)
                };
                Ok(cache.update_annotation(update, UpdateAnnotationOptions::default())?)
            }
            None => Ok(updated),
        }
    }

    /// Push a privacy change to the backends. Returns the remote ID handed
    /// out when the annotation was shared for the first time. A failed
    /// share or unshare writes the previous level back.
    async fn sync_privacy(
        &self,
        local_id: &str,
        previous: PrivacyLevel,
        updated: &UnifiedAnnotation,
    ) -> anyhow::Result<Option<String>> {
        self.annotations
            .set_annotation_privacy(local_id, updated.privacy_level)
            .await?;
        let result = self.sync_sharing(local_id, previous, updated).await;
        if result.is_err() {
            if let Err(undo) = self
                .annotations
                .set_annotation_privacy(local_id, previous)
                .await
            {
                warn!(local_id, error = %undo, "could not restore stored privacy level");
            }
        }
        result
    }

    async fn sync_sharing(
        &self,
        local_id: &str,
        previous: PrivacyLevel,
        updated: &UnifiedAnnotation,
    ) -> anyhow::Result<Option<String>> {
        let level = updated.privacy_level;
        if !previous.is_public() && level.is_public() && updated.remote_id.is_none() {
            return Ok(Some(self.sharing.share_annotation(local_id).await?));
        }
        if previous.is_public() && level.is_fully_private() {
            self.sharing.unshare_annotation(local_id).await?;
        }
        Ok(None)
    }

    /// Share every `Private` annotation on a page in one backend call.
    /// Protected annotations and ones without a local ID are left alone.
    /// Returns the annotations that were shared.
    pub async fn share_all_on_page(
        &self,
        normalized_page_url: &str,
    ) -> Result<Vec<AnnotationCacheId>> {
        let _op = self.ops.lock().await;
        let targets = self.page_targets(normalized_page_url, PrivacyLevel::Private);
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let mut shares = Vec::with_capacity(targets.len());
        let mut updates = Vec::with_capacity(targets.len());
        for (id, local_id, remote_id) in targets {
            let remote_id = match remote_id {
                Some(remote_id) => remote_id,
                None => self.ids.generate_remote_id().await?,
            };
            updates.push((id, Some(remote_id.clone())));
            shares.push((local_id, remote_id));
        }

        let (snapshot, shared) = self.apply_privacy(&updates, PrivacyLevel::Shared)?;
        let result = self.sharing.share_annotations(&shares).await;
        self.settle("share_all_on_page", snapshot, result)?;
        info!(page = normalized_page_url, count = shared.len(), "shared page annotations");
        Ok(shared)
    }

    /// Unshare every `Shared` annotation on a page in one backend call.
    /// `SharedProtected` annotations stay shared. Returns the annotations
    /// that were unshared.
    pub async fn unshare_all_on_page(
        &self,
        normalized_page_url: &str,
    ) -> Result<Vec<AnnotationCacheId>> {
        let _op = self.ops.lock().await;
        let targets = self.page_targets(normalized_page_url, PrivacyLevel::Shared);
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let mut local_ids = Vec::with_capacity(targets.len());
        let mut updates: Vec<(AnnotationCacheId, Option<String>)> =
            Vec::with_capacity(targets.len());
        for (id, local_id, _) in targets {
            updates.push((id, None));
            local_ids.push(local_id);
        }

        let (snapshot, unshared) = self.apply_privacy(&updates, PrivacyLevel::Private)?;
        let result = self.sharing.unshare_annotations(&local_ids).await;
        self.settle("unshare_all_on_page", snapshot, result)?;
        info!(page = normalized_page_url, count = unshared.len(), "unshared page annotations");
        Ok(unshared)
    }

    /// Persisted annotations on the page sitting at exactly `level`, with
    /// their local and remote IDs.
    fn page_targets(
        &self,
        normalized_page_url: &str,
        level: PrivacyLevel,
    ) -> Vec<(AnnotationCacheId, String, Option<String>)> {
        let cache = self.cache.lock();
        cache
            .annotations()
            .iter()
            .filter(|a| a.normalized_page_url == normalized_page_url && a.privacy_level == level)
            .filter_map(|a| Some((a.unified_id, a.local_id.clone()?, a.remote_id.clone())))
            .collect()
    }

    /// Move each annotation to `level` in the cache, recording remote IDs
    /// where given. All or nothing.
    fn apply_privacy(
        &self,
        updates: &[(AnnotationCacheId, Option<String>)],
        level: PrivacyLevel,
    ) -> Result<(CacheSnapshot, Vec<AnnotationCacheId>)> {
        let mut cache = self.cache.lock();
        let snapshot = cache.snapshot();
        let mut changed = Vec::with_capacity(updates.len());
        for (id, remote_id) in updates {
            let Some(current) = cache.get_annotation(*id) else {
                cache.restore(snapshot);
                return Err(CacheError::annotation(*id).into());
            };
            let mut update = AnnotationUpdate {
                privacy_level: level,
                ..AnnotationUpdate::from_annotation(current)
            };
            if remote_id.is_some() {
                update.remote_id = remote_id.clone();
            }
            if let Err(e) = cache.update_annotation(update, UpdateAnnotationOptions::default()) {
                cache.restore(snapshot);
                return Err(e.into());
            }
            changed.push(*id);
        }
        Ok((snapshot, changed))
    }

    pub async fn add_annotation_to_list(
        &self,
        annotation_id: AnnotationCacheId,
        list_id: ListCacheId,
    ) -> Result<UnifiedAnnotation> {
        self.change_membership("add_annotation_to_list", annotation_id, list_id, true)
            .await
    }

    pub async fn remove_annotation_from_list(
        &self,
        annotation_id: AnnotationCacheId,
        list_id: ListCacheId,
    ) -> Result<UnifiedAnnotation> {
        self.change_membership("remove_annotation_from_list", annotation_id, list_id, false)
            .await
    }

    async fn change_membership(
        &self,
        operation: &'static str,
        annotation_id: AnnotationCacheId,
        list_id: ListCacheId,
        add: bool,
    ) -> Result<UnifiedAnnotation> {
        let _op = self.ops.lock().await;
        let (snapshot, local_id, local_list_id, updated) = {
            let mut cache = self.cache.lock();
            let list = cache
                .get_list(list_id)
                .ok_or_else(|| CacheError::list(list_id))?;
            let local_list_id = list
                .local_id
                .ok_or_else(|| ControllerError::NotPersisted(format!("list {list_id}")))?;
            let current = cache
                .get_annotation(annotation_id)
                .ok_or_else(|| CacheError::annotation(annotation_id))?;
            let local_id = annotation_local_id(current)?;
            let mut update = AnnotationUpdate::from_annotation(current);
            if add {
                if !update.unified_list_ids.contains(&list_id) {
                    update.unified_list_ids.push(list_id);
                }
            } else {
                update.unified_list_ids.retain(|id| *id != list_id);
            }
            let snapshot = cache.snapshot();
            let updated = cache.update_annotation(update, UpdateAnnotationOptions::default())?;
            (snapshot, local_id, local_list_id, updated)
        };

        let result = if add {
            self.lists
                .add_annotation_to_list(local_list_id, &local_id)
                .await
        } else {
            self.lists
                .remove_annotation_from_list(local_list_id, &local_id)
                .await
        };
        self.settle(operation, snapshot, result)?;
        Ok(updated)
    }

    pub async fn delete_annotation(
        &self,
        annotation_id: AnnotationCacheId,
    ) -> Result<UnifiedAnnotation> {
        let _op = self.ops.lock().await;
        let (snapshot, local_id, removed) = {
            let mut cache = self.cache.lock();
            let current = cache
                .get_annotation(annotation_id)
                .ok_or_else(|| CacheError::annotation(annotation_id))?;
            let local_id = annotation_local_id(current)?;
            let snapshot = cache.snapshot();
            let removed = cache.remove_annotation(AnnotationRef::Unified(annotation_id))?;
            (snapshot, local_id, removed)
        };

        let result = self.annotations.delete_annotation(&local_id).await;
        self.settle("delete_annotation", snapshot, result)?;
        Ok(removed)
    }

    pub async fn delete_list(&self, list_id: ListCacheId) -> Result<UnifiedList> {
        let _op = self.ops.lock().await;
        let (snapshot, local_id, removed) = {
            let mut cache = self.cache.lock();
            let list = cache
                .get_list(list_id)
                .ok_or_else(|| CacheError::list(list_id))?;
            let local_id = list
                .local_id
                .ok_or_else(|| ControllerError::NotPersisted(format!("list {list_id}")))?;
            let snapshot = cache.snapshot();
            let removed = cache.remove_list(ListRef::Unified(list_id))?;
            (snapshot, local_id, removed)
        };

        let result = self.lists.delete_list(local_id).await;
        self.settle("delete_list", snapshot, result)?;
        Ok(removed)
    }

    /// Tags are not cached; this goes straight to the backend.
    pub async fn update_tags(
        &self,
        annotation_id: AnnotationCacheId,
        tags: &[String],
    ) -> Result<()> {
        let _op = self.ops.lock().await;
        let local_id = {
            let cache = self.cache.lock();
            let current = cache
                .get_annotation(annotation_id)
                .ok_or_else(|| CacheError::annotation(annotation_id))?;
            annotation_local_id(current)?
        };
        self.annotations
            .update_annotation_tags(&local_id, tags)
            .await?;
        Ok(())
    }

    fn list_local_id(&self, list_id: ListCacheId) -> Result<i64> {
        let cache = self.cache.lock();
        let list = cache
            .get_list(list_id)
            .ok_or_else(|| CacheError::list(list_id))?;
        list.local_id
            .ok_or_else(|| ControllerError::NotPersisted(format!("list {list_id}")))
    }

    /// Restore `snapshot` if the backend call failed.
    fn settle<T>(
        &self,
        operation: &'static str,
        snapshot: CacheSnapshot,
        result: anyhow::Result<T>,
    ) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(operation, error = %e, "backend call failed, rolling back");
                let events = {
                    let mut cache = self.cache.lock();
                    cache.restore(snapshot);
                    cache.events().clone()
                };
                events.send(CacheEvent::RolledBack {
                    operation: operation.to_string(),
                    reason: e.to_string(),
                });
                Err(ControllerError::Backend(e))
            }
        }
    }
}

fn annotation_local_id(annotation: &UnifiedAnnotation) -> Result<String> {
    annotation.local_id.clone().ok_or_else(|| {
        ControllerError::NotPersisted(format!("annotation {}", annotation.unified_id))
    })
}
