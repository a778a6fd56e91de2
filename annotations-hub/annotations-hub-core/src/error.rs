use thiserror::Error;

use crate::types::{AnnotationCacheId, ListCacheId};

/// Failures surfaced by [`AnnotationsCache`](crate::AnnotationsCache).
///
/// Not-found errors mean the caller held a stale or invalid reference, usually
/// one captured before a full `set_*` regeneration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("no existing cached annotation found for {0}")]
    AnnotationNotFound(String),
    #[error("no existing cached list found for {0}")]
    ListNotFound(String),
    #[error("operation not implemented: {0}")]
    Unimplemented(&'static str),
    #[error("cache invariant violated: {0}")]
    Inconsistent(String),
}

impl CacheError {
    pub fn annotation(id: AnnotationCacheId) -> Self {
        Self::AnnotationNotFound(id.to_string())
    }

    pub fn list(id: ListCacheId) -> Self {
        Self::ListNotFound(id.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
