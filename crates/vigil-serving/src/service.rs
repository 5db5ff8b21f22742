//! Detection service: the request path from a validated request to a result.
//!
//! `detect` resolves the model through the cache, then hands the pipeline
//! work to the dispatcher. The whole call counts as one in-flight request,
//! so the idle monitor cannot fire between the model lookup and the work.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vigil_abstraction::{FourCc, ImageCodec, VideoCodec};

use crate::activity::ActivityState;
use crate::cache::{CacheStats, LoadOptions, ModelCache, ModelKey};
use crate::config::{ConfigError, ServingConfig};
use crate::dispatcher::WorkDispatcher;
use crate::error::{Result, ServingError};
use crate::loader::{ModelFactory, ModelLoader};
use crate::media::{FfmpegVideoCodec, ImageCrateCodec};
use crate::monitor::{IdleMonitor, MonitorState};
use crate::pipeline::{ImageInput, ImagePipeline, Pipeline, PipelineOptions, VideoInput, VideoPipeline};
use crate::request::{DetectionRequest, DetectionResult, MediaMode};

/// Handles for the background tasks started by
/// [`DetectionService::spawn_background`].
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    pub sweeper: Option<JoinHandle<()>>,
    pub monitor: Option<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Wait for both tasks to stop.
    pub async fn join(self) {
        for handle in [self.sweeper, self.monitor].into_iter().flatten() {
            let _ = handle.await;
        }
    }
}

/// The serving core: model cache, worker pool, codecs and pipelines.
pub struct DetectionService {
    config: ServingConfig,
    fourcc: FourCc,
    activity: Arc<ActivityState>,
    dispatcher: Arc<WorkDispatcher>,
    cache: Arc<ModelCache>,
    image_codec: Arc<dyn ImageCodec>,
    video_codec: Arc<dyn VideoCodec>,
}

impl std::fmt::Debug for DetectionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionService")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl DetectionService {
    /// Build a service with the built-in model factory and codecs.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn new(config: ServingConfig) -> std::result::Result<Self, ConfigError> {
        let loader = Arc::new(ModelFactory::new(config.model_dir.clone()));
        Self::with_components(
            config,
            loader,
            Arc::new(ImageCrateCodec::new()),
            Arc::new(FfmpegVideoCodec::default()),
        )
    }

    /// Build a service from explicit components.
    ///
    /// # Errors
    /// Returns `ConfigError` if the configuration is invalid.
    pub fn with_components(
        config: ServingConfig,
        loader: Arc<dyn ModelLoader>,
        image_codec: Arc<dyn ImageCodec>,
        video_codec: Arc<dyn VideoCodec>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let fourcc = config.video_fourcc()?;

        let activity = Arc::new(ActivityState::new());
        let dispatcher = Arc::new(
            WorkDispatcher::new(config.request_threads, Arc::clone(&activity))
                .with_timeout(config.request_timeout()),
        );
        if dispatcher.is_inline() {
            info!("Request thread pool disabled; model work runs inline");
        } else {
            info!(threads = config.request_threads, "Initialized request thread pool");
        }

        let cache = ModelCache::new(config.cache_config(), loader, Arc::clone(&dispatcher))
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

        Ok(Self {
            config,
            fourcc,
            activity,
            dispatcher,
            cache: Arc::new(cache),
            image_codec,
            video_codec,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &ServingConfig {
        &self.config
    }

    #[must_use]
    pub const fn activity(&self) -> &Arc<ActivityState> {
        &self.activity
    }

    #[must_use]
    pub const fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Cache key of the configured model for `mode`.
    #[must_use]
    pub fn model_key(&self, mode: MediaMode) -> ModelKey {
        ModelKey::new(
            self.config.model_name.clone(),
            self.config.model_kind,
            LoadOptions { mode: Some(mode) },
        )
    }

    /// Run one detection request.
    ///
    /// A video request's staged file is deleted however this call ends.
    ///
    /// # Errors
    /// Returns `ServingError::InvalidInput` before any work for bad requests,
    /// `ServingError::Load` if the model cannot be loaded, and pipeline or
    /// dispatch errors otherwise.
    pub async fn detect(&self, request: DetectionRequest) -> Result<DetectionResult> {
        // Rejected requests count as activity too and postpone idle shutdown.
        let guard = self.activity.begin_request();
        let mode = request.mode();
        let options = PipelineOptions { min_score: request.min_score() };
        let validation = request.validate();

        // Take ownership of a staged video before anything can fail.
        let input = match request {
            DetectionRequest::Image { bytes, asset_id, .. } => Input::Image(ImageInput { bytes, asset_id }),
            DetectionRequest::Video { path, .. } => Input::Video(VideoInput::new(path)),
        };
        validation?;

        let key = self.model_key(mode);
        let model = self
            .cache
            .get(&key)
            .await
            .map_err(|source| ServingError::Load { model: key.to_string(), source })?;
        debug!(model = %key, %mode, "Dispatching detection");

        match input {
            Input::Image(input) => {
                let mut pipeline =
                    ImagePipeline::new(Arc::clone(&self.image_codec), &self.config.results_dir, self.config.default_min_score);
                pipeline.configure(&options);
                self.dispatcher
                    .run_blocking(move || {
                        let _guard = guard;
                        pipeline.predict(model.as_ref(), input)
                    })
                    .await?
            }
            Input::Video(input) => {
                let mut pipeline = VideoPipeline::new(
                    Arc::clone(&self.video_codec),
                    &self.config.results_dir,
                    self.fourcc,
                    self.config.default_min_score,
                );
                pipeline.configure(&options);
                self.dispatcher
                    .run_blocking(move || {
                        let _guard = guard;
                        pipeline.predict(model.as_ref(), input)
                    })
                    .await?
            }
        }
    }

    /// Start the cache sweeper and the idle monitor. The monitor cancels
    /// `shutdown` when the process has been idle for longer than the TTL.
    #[must_use]
    pub fn spawn_background(&self, shutdown: &CancellationToken) -> BackgroundTasks {
        let sweeper = self.cache.spawn_sweeper(shutdown.clone());
        let state = MonitorState::from_secs(self.config.model_ttl_secs, self.config.model_ttl_poll_secs);
        let monitor = IdleMonitor::new(Arc::clone(&self.activity), state, shutdown.clone()).spawn();
        BackgroundTasks { sweeper, monitor }
    }

    /// Tear down every cached model and stop admitting work.
    pub fn shutdown(&self) {
        info!(stats = ?self.cache.stats(), "Shutting down detection service");
        self.cache.clear();
        self.dispatcher.close();
    }
}

enum Input {
    Image(ImageInput),
    Video(VideoInput),
}
