//! Collaborator seams around the cache.
//!
//! Storage, list management and content sharing are reached through the
//! traits below. [`AnnotationsController`] drives them together with a shared
//! [`AnnotationsCache`](crate::AnnotationsCache) and [`MemoryBackend`] is an
//! in-process implementation of all of them.

use anyhow::Result;
use async_trait::async_trait;

use crate::privacy::PrivacyLevel;
use crate::types::AnnotationForCaching;

mod controller;
mod memory;

pub use controller::{AnnotationsController, ControllerError};
pub use memory::{MemoryBackend, StoredAnnotation, StoredList};

/// Durable annotation storage. Annotations are addressed by their local ID.
#[async_trait]
pub trait AnnotationsBackend: Send + Sync {
    /// Persist a new annotation and return its local ID.
    async fn create_annotation(&self, annotation: &AnnotationForCaching) -> Result<String>;
    async fn edit_annotation(&self, local_id: &str, comment: Option<&str>) -> Result<()>;
    async fn delete_annotation(&self, local_id: &str) -> Result<()>;
    async fn set_annotation_privacy(&self, local_id: &str, level: PrivacyLevel) -> Result<()>;
    async fn update_annotation_tags(&self, local_id: &str, tags: &[String]) -> Result<()>;
}

/// Durable list storage. Lists are addressed by their local ID.
#[async_trait]
pub trait ListsBackend: Send + Sync {
    /// Persist a new list and return its local ID.
    async fn create_list(&self, name: &str, description: Option<&str>) -> Result<i64>;
    async fn delete_list(&self, local_list_id: i64) -> Result<()>;
    async fn add_annotation_to_list(
        &self,
        local_list_id: i64,
        local_annotation_id: &str,
    ) -> Result<()>;
    async fn remove_annotation_from_list(
        &self,
        local_list_id: i64,
        local_annotation_id: &str,
    ) -> Result<()>;
}

/// Remote sharing. Sharing hands out the remote ID the content is known by.
#[async_trait]
pub trait ContentSharingBackend: Send + Sync {
    async fn share_list(&self, local_list_id: i64) -> Result<String>;
    async fn share_annotation(&self, local_id: &str) -> Result<String>;
    async fn unshare_annotation(&self, local_id: &str) -> Result<()>;
    /// Share several annotations under pre-allocated remote IDs, given as
    /// `(local_id, remote_id)` pairs. Bulk calls also move the stored privacy
    /// level and apply to every annotation or to none.
    async fn share_annotations(&self, shares: &[(String, String)]) -> Result<()>;
    async fn unshare_annotations(&self, local_ids: &[String]) -> Result<()>;
}

/// Hands out remote IDs ahead of sharing, so bulk shares can be cached
/// optimistically.
#[async_trait]
pub trait RemoteIdAllocator: Send + Sync {
    async fn generate_remote_id(&self) -> Result<String>;
}
