//! Model caching system for optimizing model lifecycle.
//!
//! Models are loaded lazily on first use, shared between concurrent callers,
//! and unloaded after a configurable period of inactivity.

#[allow(clippy::module_inception)]
pub mod cache;
pub mod config;
pub mod types;

pub use cache::ModelCache;
pub use config::{CacheConfig, CacheConfigError};
pub use types::{CacheEntry, CacheStats, LoadOptions, ModelKey, ModelKind};
