pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod normalized;
pub mod privacy;
pub mod sharing;
pub mod types;

pub use cache::{AnnotationsCache, CacheBuilder, CacheSnapshot};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use events::{CacheEvent, EventBus};
pub use privacy::PrivacyLevel;
