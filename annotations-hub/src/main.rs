//! Annotations hub command line
//!
//! Rebuilds a unified cache from a backend dump, then prints what each page
//! looks like or validates the cache invariants.

use annotations_hub_core::{
    types::{CacheDump, CacheOptions},
    AnnotationsCache, CacheConfig, PrivacyLevel,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "annotations-hub")]
#[command(about = "Inspect and validate unified annotation caches")]
struct Cli {
    /// Cache configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print per-page shared lists and annotation memberships as JSON
    Inspect {
        /// Backend dump to load
        dump: PathBuf,
    },

    /// Rebuild the cache and verify its invariants
    Check {
        /// Backend dump to load
        dump: PathBuf,
    },
}

#[derive(Debug, Serialize)]
struct Inspection {
    lists: Vec<ListReport>,
    pages: BTreeMap<String, PageReport>,
}

#[derive(Debug, Serialize)]
struct ListReport {
    unified_id: String,
    name: String,
    shared: bool,
    annotations: usize,
}

#[derive(Debug, Default, Serialize)]
struct PageReport {
    shared_lists: Vec<String>,
    annotations: Vec<AnnotationReport>,
}

#[derive(Debug, Serialize)]
struct AnnotationReport {
    unified_id: String,
    local_id: Option<String>,
    privacy_level: PrivacyLevel,
    lists: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = match &cli.config {
        Some(path) => CacheConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => CacheConfig::default(),
    };

    match cli.command {
        Commands::Inspect { dump } => {
            let cache = load_cache(&dump, config).await?;
            println!("{}", serde_json::to_string_pretty(&inspect(&cache))?);
        }
        Commands::Check { dump } => {
            let cache = load_cache(&dump, config).await?;
            cache
                .check_invariants()
                .with_context(|| format!("{} is inconsistent", dump.display()))?;
            info!(
                annotations = cache.annotations().len(),
                lists = cache.lists().len(),
                "cache invariants hold"
            );
            println!("ok");
        }
    }

    Ok(())
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn load_cache(path: &Path, config: CacheConfig) -> Result<AnnotationsCache> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let dump: CacheDump = serde_json::from_slice(&raw)
        .with_context(|| format!("{} is not a cache dump", path.display()))?;
    info!(
        lists = dump.lists.len(),
        annotations = dump.annotations.len(),
        pages = dump.pages.len(),
        "loading dump"
    );

    let mut cache = AnnotationsCache::new(config);
    cache.load_dump(dump, CacheOptions::default());
    Ok(cache)
}

fn inspect(cache: &AnnotationsCache) -> Inspection {
    let lists = cache
        .lists()
        .iter()
        .map(|list| ListReport {
            unified_id: list.unified_id.to_string(),
            name: list.name.clone(),
            shared: list.is_shared(),
            annotations: list.unified_annotation_ids.len(),
        })
        .collect();

    let mut pages: BTreeMap<String, PageReport> = BTreeMap::new();
    for annotation in cache.get_annotations_array() {
        let page = pages
            .entry(annotation.normalized_page_url.clone())
            .or_insert_with(|| PageReport {
                shared_lists: cache
                    .get_shared_page_list_ids(&annotation.normalized_page_url)
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
                annotations: Vec::new(),
            });
        page.annotations.push(AnnotationReport {
            unified_id: annotation.unified_id.to_string(),
            local_id: annotation.local_id.clone(),
            privacy_level: annotation.privacy_level,
            lists: annotation
                .unified_list_ids
                .iter()
                .map(ToString::to_string)
                .collect(),
        });
    }

    Inspection { lists, pages }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DUMP: &str = r#"{
        "lists": [
            {"local_id": 1, "remote_id": "team", "name": "Team"},
            {"local_id": 2, "name": "Mine"}
        ],
        "annotations": [
            {"local_id": "a", "normalized_page_url": "example.com", "privacy_level": "shared"},
            {"local_id": "b", "normalized_page_url": "example.com", "local_list_ids": [2]},
            {"local_id": "c", "normalized_page_url": "other.org", "privacy_level": "protected"}
        ],
        "pages": {"example.com": [1]}
    }"#;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "annotations-hub",
            "check",
            "dump.json",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        assert!(cli.config.is_none());
        assert!(matches!(cli.command, Commands::Check { .. }));
    }

    #[tokio::test]
    async fn inspect_groups_annotations_by_page() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump.json");
        std::fs::write(&path, DUMP).unwrap();

        let cache = load_cache(&path, CacheConfig::default()).await.unwrap();
        cache.check_invariants().unwrap();
        let report = inspect(&cache);

        assert_eq!(report.lists.len(), 2);
        let page = &report.pages["example.com"];
        assert_eq!(page.shared_lists.len(), 1);
        assert_eq!(page.annotations.len(), 2);
        let shared = page
            .annotations
            .iter()
            .find(|a| a.local_id.as_deref() == Some("a"))
            .unwrap();
        assert_eq!(shared.lists, page.shared_lists);
        assert!(report.pages["other.org"].shared_lists.is_empty());
    }

    #[tokio::test]
    async fn rejects_malformed_dump() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        let err = load_cache(&path, CacheConfig::default()).await.unwrap_err();
        assert!(err.to_string().contains("is not a cache dump"));
        assert!(load_cache(&dir.path().join("missing.json"), CacheConfig::default())
            .await
            .is_err());
    }
}
