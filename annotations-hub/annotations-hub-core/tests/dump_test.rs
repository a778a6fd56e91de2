//! Rebuilding a cache from a backend dump written to disk

use annotations_hub_core::{
    sharing::{AnnotationsBackend, ContentSharingBackend, ListsBackend, MemoryBackend},
    types::{AnnotationForCaching, CacheDump, CacheOptions},
    AnnotationsCache, CacheConfig, PrivacyLevel,
};
use anyhow::Result;
use futures::StreamExt;
use tempfile::TempDir;

async fn seeded_backend() -> Result<MemoryBackend> {
    let backend = MemoryBackend::new();
    backend
        .create_annotation(&AnnotationForCaching {
            local_id: Some("public".into()),
            normalized_page_url: "example.com/article".into(),
            privacy_level: PrivacyLevel::Shared,
            ..Default::default()
        })
        .await?;
    backend
        .create_annotation(&AnnotationForCaching {
            local_id: Some("private".into()),
            normalized_page_url: "example.com/article".into(),
            ..Default::default()
        })
        .await?;
    let list = backend.create_list("team", None).await?;
    backend.add_annotation_to_list(list, "private").await?;
    backend.share_list(list).await?;
    Ok(backend)
}

#[tokio::test]
async fn test_dump_round_trips_through_json_file() -> Result<()> {
    let backend = seeded_backend().await?;
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("dump.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&backend.dump().await)?)?;

    let dump: CacheDump = serde_json::from_slice(&std::fs::read(&path)?)?;
    let mut cache = AnnotationsCache::new(CacheConfig::default());
    cache.load_dump(dump, CacheOptions::default());

    let list = cache.get_list_by_local_id(1).unwrap().unified_id;
    assert_eq!(cache.get_shared_page_list_ids("example.com/article"), vec![list]);

    let public = cache.get_annotation_by_local_id("public").unwrap();
    assert_eq!(public.unified_list_ids, vec![list]);
    assert_eq!(public.privacy_level, PrivacyLevel::Shared);

    // explicit member of a shared list
    let private = cache.get_annotation_by_local_id("private").unwrap();
    assert_eq!(private.privacy_level, PrivacyLevel::Protected);
    assert_eq!(private.unified_list_ids, vec![list]);

    cache.check_invariants()?;
    Ok(())
}

#[tokio::test]
async fn test_load_announces_state_on_stream() -> Result<()> {
    let backend = seeded_backend().await?;
    let mut cache = AnnotationsCache::new(CacheConfig::default());
    let mut events = cache.events().stream();

    cache.load_dump(backend.dump().await, CacheOptions::default());

    let mut names = Vec::new();
    for _ in 0..4 {
        let event = events.next().await.unwrap()?;
        names.push(event.name());
    }
    assert_eq!(
        names,
        vec![
            "newListsState",
            "newAnnotationsState",
            "newAnnotationsState",
            "newListsState"
        ]
    );
    assert_eq!(events.next().await.unwrap()?.name(), "updatedPageData");
    Ok(())
}
