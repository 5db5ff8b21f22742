//! Serving core for media detection.
//!
//! Models are loaded on first use into a [`ModelCache`] and evicted after a
//! period of disuse. Blocking model work runs on a bounded [`WorkDispatcher`],
//! and an [`IdleMonitor`] asks the host to shut down once nothing has happened
//! for longer than the model TTL. [`DetectionService`] ties these together
//! behind a single `detect` call.

pub mod activity;
pub mod cache;
pub mod config;
pub mod detectors;
pub mod dispatcher;
pub mod error;
pub mod loader;
pub mod media;
pub mod monitor;
pub mod pipeline;
pub mod render;
pub mod request;
pub mod service;

pub use activity::{ActivityGuard, ActivityState};
pub use cache::{CacheConfig, CacheConfigError, CacheEntry, CacheStats, LoadOptions, ModelCache, ModelKey, ModelKind};
pub use config::{ConfigError, ServingConfig};
pub use dispatcher::{DispatchError, WorkDispatcher};
pub use error::{Result, ServingError};
pub use loader::{ModelFactory, ModelLoader};
pub use monitor::{IdleMonitor, MonitorState};
pub use request::{DetectionRequest, DetectionResult, MediaMode, RequestInput, RequestOptions};
pub use service::{BackgroundTasks, DetectionService};
