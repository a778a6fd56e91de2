use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::normalized::NormalizedState;
use crate::types::{AnnotationCacheId, ListCacheId, UnifiedAnnotation, UnifiedList};

pub type AnnotationsState = NormalizedState<AnnotationCacheId, UnifiedAnnotation>;
pub type ListsState = NormalizedState<ListCacheId, UnifiedList>;

/// Change notifications, sent after a mutation has been fully applied.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum CacheEvent {
    NewAnnotationsState { state: Arc<AnnotationsState> },
    NewListsState { state: Arc<ListsState> },
    AddedAnnotation { annotation: UnifiedAnnotation },
    UpdatedAnnotation { annotation: UnifiedAnnotation },
    RemovedAnnotation { annotation: UnifiedAnnotation },
    AddedList { list: UnifiedList },
    UpdatedList { list: UnifiedList },
    RemovedList { list: UnifiedList },
    UpdatedPageData {
        normalized_page_url: String,
        list_ids: Vec<ListCacheId>,
    },
    /// An optimistic mutation was reverted after its backend call failed.
    RolledBack { operation: String, reason: String },
}

impl CacheEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CacheEvent::NewAnnotationsState { .. } => "newAnnotationsState",
            CacheEvent::NewListsState { .. } => "newListsState",
            CacheEvent::AddedAnnotation { .. } => "addedAnnotation",
            CacheEvent::UpdatedAnnotation { .. } => "updatedAnnotation",
            CacheEvent::RemovedAnnotation { .. } => "removedAnnotation",
            CacheEvent::AddedList { .. } => "addedList",
            CacheEvent::UpdatedList { .. } => "updatedList",
            CacheEvent::RemovedList { .. } => "removedList",
            CacheEvent::UpdatedPageData { .. } => "updatedPageData",
            CacheEvent::RolledBack { .. } => "rolledBack",
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CacheEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(100)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a `Stream`; lagged receivers yield an error item.
    pub fn stream(&self) -> BroadcastStream<CacheEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    pub fn send(&self, event: CacheEvent) {
        // no subscribers is fine
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn stream_receives_events_in_order() {
        let bus = EventBus::new();
        let mut stream = bus.stream();
        bus.send(CacheEvent::RolledBack {
            operation: "edit".into(),
            reason: "offline".into(),
        });
        bus.send(CacheEvent::UpdatedPageData {
            normalized_page_url: "example.com".into(),
            list_ids: vec![],
        });

        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(first.name(), "rolledBack");
        assert_eq!(second.name(), "updatedPageData");
    }

    #[test]
    fn send_without_subscribers_is_silent() {
        let bus = EventBus::with_capacity(0);
        bus.send(CacheEvent::RolledBack {
            operation: "noop".into(),
            reason: String::new(),
        });
    }
}
