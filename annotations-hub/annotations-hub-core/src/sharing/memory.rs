use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{AnnotationsBackend, ContentSharingBackend, ListsBackend, RemoteIdAllocator};
use crate::privacy::PrivacyLevel;
use crate::types::{AnnotationForCaching, CacheDump, ListForCaching, Selector, UserReference};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredAnnotation {
    pub local_id: String,
    pub remote_id: Option<String>,
    pub normalized_page_url: String,
    pub body: Option<String>,
    pub comment: Option<String>,
    pub selector: Option<Selector>,
    pub creator: Option<UserReference>,
    pub privacy_level: PrivacyLevel,
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredList {
    pub local_id: i64,
    pub remote_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub annotation_ids: Vec<String>,
}

#[derive(Default)]
struct MemoryState {
    annotations: BTreeMap<String, StoredAnnotation>,
    lists: BTreeMap<i64, StoredList>,
    next_list_id: i64,
    fail_next: Option<String>,
    /// Keyed by trait method name.
    fail_on: HashMap<&'static str, String>,
    latency: Option<Duration>,
}

impl MemoryState {
    fn take_failure(&mut self, operation: &'static str) -> Result<()> {
        if let Some(reason) = self.fail_next.take() {
            bail!(reason);
        }
        match self.fail_on.remove(operation) {
            Some(reason) => bail!(reason),
            None => Ok(()),
        }
    }

    fn annotation_mut(&mut self, local_id: &str) -> Result<&mut StoredAnnotation> {
        self.annotations
            .get_mut(local_id)
            .ok_or_else(|| anyhow!("annotation {local_id} not found"))
    }

    fn list_mut(&mut self, local_list_id: i64) -> Result<&mut StoredList> {
        self.lists
            .get_mut(&local_list_id)
            .ok_or_else(|| anyhow!("list {local_list_id} not found"))
    }
}

/// In-process backend implementing every collaborator trait.
///
/// `fail_next` makes the next backend call fail once and `fail_on` does the
/// same for one named trait method, which is how rollback paths are
/// exercised. `set_latency` delays every call so concurrent callers overlap.
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                next_list_id: 1,
                ..Default::default()
            }),
        }
    }

    pub async fn fail_next(&self, reason: impl Into<String>) {
        self.state.lock().await.fail_next = Some(reason.into());
    }

    /// Fail the next call of the trait method named `operation`.
    pub async fn fail_on(&self, operation: &'static str, reason: impl Into<String>) {
        self.state
            .lock()
            .await
            .fail_on
            .insert(operation, reason.into());
    }

    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = Some(latency);
    }

    pub async fn annotation(&self, local_id: &str) -> Option<StoredAnnotation> {
        self.state.lock().await.annotations.get(local_id).cloned()
    }

    pub async fn list(&self, local_list_id: i64) -> Option<StoredList> {
        self.state.lock().await.lists.get(&local_list_id).cloned()
    }

    /// Everything stored, shaped for
    /// [`AnnotationsCache::load_dump`](crate::AnnotationsCache::load_dump).
    /// Pages belong to the shared lists their annotations sit in.
    pub async fn dump(&self) -> CacheDump {
        let state = self.state.lock().await;
        let mut memberships: HashMap<&str, Vec<i64>> = HashMap::new();
        let mut pages: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        for list in state.lists.values() {
            for annotation_id in &list.annotation_ids {
                memberships
                    .entry(annotation_id.as_str())
                    .or_default()
                    .push(list.local_id);
                if list.remote_id.is_none() {
                    continue;
                }
                if let Some(annotation) = state.annotations.get(annotation_id) {
                    let entry = pages
                        .entry(annotation.normalized_page_url.clone())
                        .or_default();
                    if !entry.contains(&list.local_id) {
                        entry.push(list.local_id);
                    }
                }
            }
        }

        let lists = state
            .lists
            .values()
            .map(|list| ListForCaching {
                local_id: Some(list.local_id),
                remote_id: list.remote_id.clone(),
                name: list.name.clone(),
                description: list.description.clone(),
                ..Default::default()
            })
            .collect();
        let annotations = state
            .annotations
            .values()
            .map(|annotation| AnnotationForCaching {
                local_id: Some(annotation.local_id.clone()),
                remote_id: annotation.remote_id.clone(),
                normalized_page_url: annotation.normalized_page_url.clone(),
                body: annotation.body.clone(),
                comment: annotation.comment.clone(),
                selector: annotation.selector.clone(),
                creator: annotation.creator.clone(),
                privacy_level: annotation.privacy_level,
                local_list_ids: memberships
                    .get(annotation.local_id.as_str())
                    .cloned()
                    .unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        CacheDump {
            lists,
            annotations,
            pages,
        }
    }
}

impl MemoryBackend {
    /// Wait out the configured latency, then lock the state for `operation`.
    async fn enter(&self, operation: &'static str) -> Result<MutexGuard<'_, MemoryState>> {
        let latency = self.state.lock().await.latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock().await;
        state.take_failure(operation)?;
        Ok(state)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnnotationsBackend for MemoryBackend {
    async fn create_annotation(&self, annotation: &AnnotationForCaching) -> Result<String> {
        let mut state = self.enter("create_annotation").await?;
        let local_id = annotation
            .local_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if state.annotations.contains_key(&local_id) {
            bail!("annotation {local_id} already exists");
        }
        state.annotations.insert(
            local_id.clone(),
            StoredAnnotation {
                local_id: local_id.clone(),
                remote_id: annotation.remote_id.clone(),
                normalized_page_url: annotation.normalized_page_url.clone(),
                body: annotation.body.clone(),
                comment: annotation.comment.clone(),
                selector: annotation.selector.clone(),
                creator: annotation.creator.clone(),
                privacy_level: annotation.privacy_level,
                tags: Vec::new(),
            },
        );
        Ok(local_id)
    }

    async fn edit_annotation(&self, local_id: &str, comment: Option<&str>) -> Result<()> {
        let mut state = self.enter("edit_annotation").await?;
        state.annotation_mut(local_id)?.comment = comment.map(str::to_string);
        Ok(())
    }

    async fn delete_annotation(&self, local_id: &str) -> Result<()> {
        let mut state = self.enter("delete_annotation").await?;
        state
            .annotations
            .remove(local_id)
            .ok_or_else(|| anyhow!("annotation {local_id} not found"))?;
        for list in state.lists.values_mut() {
            list.annotation_ids.retain(|id| id != local_id);
        }
        Ok(())
    }

    async fn set_annotation_privacy(&self, local_id: &str, level: PrivacyLevel) -> Result<()> {
        let mut state = self.enter("set_annotation_privacy").await?;
        state.annotation_mut(local_id)?.privacy_level = level;
        Ok(())
    }

    async fn update_annotation_tags(&self, local_id: &str, tags: &[String]) -> Result<()> {
        let mut state = self.enter("update_annotation_tags").await?;
        state.annotation_mut(local_id)?.tags = tags.to_vec();
        Ok(())
    }
}

#[async_trait]
impl ListsBackend for MemoryBackend {
    async fn create_list(&self, name: &str, description: Option<&str>) -> Result<i64> {
        let mut state = self.enter("create_list").await?;
        let local_id = state.next_list_id;
        state.next_list_id += 1;
        state.lists.insert(
            local_id,
            StoredList {
                local_id,
                remote_id: None,
                name: name.to_string(),
                description: description.map(str::to_string),
                annotation_ids: Vec::new(),
            },
        );
        Ok(local_id)
    }

    async fn delete_list(&self, local_list_id: i64) -> Result<()> {
        let mut state = self.enter("delete_list").await?;
        state
            .lists
            .remove(&local_list_id)
            .ok_or_else(|| anyhow!("list {local_list_id} not found"))?;
        Ok(())
    }

    async fn add_annotation_to_list(
        &self,
        local_list_id: i64,
        local_annotation_id: &str,
    ) -> Result<()> {
        let mut state = self.enter("add_annotation_to_list").await?;
        if !state.annotations.contains_key(local_annotation_id) {
            bail!("annotation {local_annotation_id} not found");
        }
        let list = state.list_mut(local_list_id)?;
        if !list.annotation_ids.iter().any(|id| id == local_annotation_id) {
            list.annotation_ids.push(local_annotation_id.to_string());
        }
        Ok(())
    }

    async fn remove_annotation_from_list(
        &self,
        local_list_id: i64,
        local_annotation_id: &str,
    ) -> Result<()> {
        let mut state = self.enter("remove_annotation_from_list").await?;
        state
            .list_mut(local_list_id)?
            .annotation_ids
            .retain(|id| id != local_annotation_id);
        Ok(())
    }
}

#[async_trait]
impl ContentSharingBackend for MemoryBackend {
    async fn share_list(&self, local_list_id: i64) -> Result<String> {
        let mut state = self.enter("share_list").await?;
        let list = state.list_mut(local_list_id)?;
        let remote_id = list
            .remote_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        Ok(remote_id)
    }

    async fn share_annotation(&self, local_id: &str) -> Result<String> {
        let mut state = self.enter("share_annotation").await?;
        let annotation = state.annotation_mut(local_id)?;
        let remote_id = annotation
            .remote_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        Ok(remote_id)
    }

    async fn unshare_annotation(&self, local_id: &str) -> Result<()> {
        let mut state = self.enter("unshare_annotation").await?;
        state.annotation_mut(local_id)?.remote_id = None;
        Ok(())
    }

    async fn share_annotations(&self, shares: &[(String, String)]) -> Result<()> {
        let mut state = self.enter("share_annotations").await?;
        if let Some((missing, _)) = shares
            .iter()
            .find(|(local_id, _)| !state.annotations.contains_key(local_id.as_str()))
        {
            bail!("annotation {missing} not found");
        }
        for (local_id, remote_id) in shares {
            let annotation = state.annotation_mut(local_id)?;
            annotation.remote_id = Some(remote_id.clone());
            annotation.privacy_level = PrivacyLevel::Shared;
        }
        Ok(())
    }

    async fn unshare_annotations(&self, local_ids: &[String]) -> Result<()> {
        let mut state = self.enter("unshare_annotations").await?;
        if let Some(missing) = local_ids
            .iter()
            .find(|local_id| !state.annotations.contains_key(local_id.as_str()))
        {
            bail!("annotation {missing} not found");
        }
        for local_id in local_ids {
            let annotation = state.annotation_mut(local_id)?;
            annotation.remote_id = None;
            annotation.privacy_level = PrivacyLevel::Private;
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteIdAllocator for MemoryBackend {
    async fn generate_remote_id(&self) -> Result<String> {
        let _state = self.enter("generate_remote_id").await?;
        Ok(Uuid::new_v4().to_string())
    }
}
