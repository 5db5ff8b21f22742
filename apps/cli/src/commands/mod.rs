//! CLI command implementations.

pub mod config;
pub mod detect;
pub mod serve;

use std::path::PathBuf;

use clap::Args;
use vigil_serving::{ModelKind, ServingConfig};

pub use detect::DetectArgs;

/// Command-line overrides, applied after the config file and environment.
#[derive(Args, Debug, Default)]
pub struct ConfigOverrides {
    /// Model to serve
    #[arg(long, global = true)]
    pub model_name: Option<String>,

    /// Model backend (mock, color-rule)
    #[arg(long, global = true)]
    pub model_kind: Option<ModelKind>,

    /// Root directory of model artifacts
    #[arg(long, global = true)]
    pub model_dir: Option<PathBuf>,

    /// Directory for detection results
    #[arg(long, global = true)]
    pub results_dir: Option<PathBuf>,

    /// Seconds of inactivity before unloading models and shutting down (0 disables)
    #[arg(long, global = true)]
    pub model_ttl: Option<u64>,

    /// Worker threads for model work (0 runs inline)
    #[arg(long, global = true)]
    pub request_threads: Option<usize>,

    /// Per-request time limit in seconds
    #[arg(long, global = true)]
    pub request_timeout: Option<u64>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut ServingConfig) {
        if let Some(name) = &self.model_name {
            config.model_name.clone_from(name);
        }
        if let Some(kind) = self.model_kind {
            config.model_kind = kind;
        }
        if let Some(dir) = &self.model_dir {
            config.model_dir.clone_from(dir);
        }
        if let Some(dir) = &self.results_dir {
            config.results_dir.clone_from(dir);
        }
        if let Some(ttl) = self.model_ttl {
            config.model_ttl_secs = ttl;
        }
        if let Some(threads) = self.request_threads {
            config.request_threads = threads;
        }
        if let Some(timeout) = self.request_timeout {
            config.request_timeout_secs = Some(timeout);
        }
    }
}
