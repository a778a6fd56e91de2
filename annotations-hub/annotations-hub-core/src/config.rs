//! Construction-time settings for the annotations cache.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Emit warnings for index misses such as unknown local list IDs.
    #[serde(default)]
    pub debug: bool,

    /// Buffered events per subscriber before it starts lagging (default 100)
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_event_capacity() -> usize { 100 }

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            debug: false,
            event_capacity: default_event_capacity(),
        }
    }
}

impl CacheConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_use_defaults() {
        let config: CacheConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CacheConfig::default());

        let config: CacheConfig = serde_json::from_str(r#"{"debug": true}"#).unwrap();
        assert!(config.debug);
        assert_eq!(config.event_capacity, 100);
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, r#"{"debug": false, "event_capacity": 8}"#).unwrap();
        let config = CacheConfig::from_json_file(&path).unwrap();
        assert_eq!(config.event_capacity, 8);
        assert!(CacheConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }
}
