//! ModelCache implementation with single-flight loading and TTL eviction.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_abstraction::{DetectionModel, ModelError};

use super::config::{CacheConfig, CacheConfigError};
use super::types::{CacheEntry, CacheStats, ModelKey};
use crate::dispatcher::WorkDispatcher;
use crate::loader::ModelLoader;

type LoadOutcome = Result<Arc<dyn DetectionModel>, ModelError>;
type PendingLoad = Shared<BoxFuture<'static, LoadOutcome>>;

enum Slot {
    /// A load is running; every caller for this key awaits the same future.
    Loading { id: u64, pending: PendingLoad },
    Ready(CacheEntry),
}

type Slots = HashMap<ModelKey, Slot>;

/// Model cache for optimizing model lifecycle.
///
/// Provides lazy single-flight loading, one clear-and-retry on artifact
/// failures, and TTL eviction of idle models.
pub struct ModelCache {
    /// The cache storage (key -> loading or loaded model).
    slots: Arc<Mutex<Slots>>,
    /// Backend used to load models.
    loader: Arc<dyn ModelLoader>,
    /// Pool that runs the blocking loads.
    dispatcher: Arc<WorkDispatcher>,
    /// Cache configuration.
    config: CacheConfig,
    /// Cache statistics.
    stats: Arc<RwLock<CacheStats>>,
    next_load_id: AtomicU64,
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl ModelCache {
    /// Create a new model cache with the given configuration.
    ///
    /// # Errors
    /// Returns `CacheConfigError` if the configuration is invalid.
    pub fn new(
        config: CacheConfig,
        loader: Arc<dyn ModelLoader>,
        dispatcher: Arc<WorkDispatcher>,
    ) -> Result<Self, CacheConfigError> {
        config.validate()?;

        info!(
            ttl_secs = config.ttl_secs,
            "Created in-memory model cache ({})",
            if config.eviction_enabled() { "unloading idle models" } else { "unloading disabled" }
        );

        Ok(Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            loader,
            dispatcher,
            config,
            stats: Arc::new(RwLock::new(CacheStats::default())),
            next_load_id: AtomicU64::new(0),
        })
    }

    /// Get a model from cache, loading it if not present.
    ///
    /// Concurrent callers for a key that is already loading wait for that
    /// load and share its outcome.
    ///
    /// # Errors
    /// Returns `ModelError` if the load fails after its retry.
    pub async fn get(&self, key: &ModelKey) -> Result<Arc<dyn DetectionModel>, ModelError> {
        let pending = {
            let mut slots = lock(&self.slots);
            match slots.get_mut(key) {
                Some(Slot::Ready(entry)) => {
                    entry.touch();
                    let model = Arc::clone(&entry.model);
                    drop(slots);
                    self.record(|stats| stats.total_hits += 1);
                    debug!(model = %key, "Cache hit");
                    return Ok(model);
                }
                Some(Slot::Loading { pending, .. }) => {
                    debug!(model = %key, "Joining in-progress load");
                    pending.clone()
                }
                None => {
                    debug!(model = %key, "Cache miss, loading model");
                    let id = self.next_load_id.fetch_add(1, Ordering::Relaxed);
                    let pending = self.start_load(id, key.clone());
                    slots.insert(key.clone(), Slot::Loading { id, pending: pending.clone() });
                    pending
                }
            }
        };
        self.record(|stats| stats.total_misses += 1);

        pending.await
    }

    /// Spawn the load for `key`. The task publishes its own outcome into the
    /// slot map before completing, so it finishes even if every caller stops
    /// waiting.
    fn start_load(&self, id: u64, key: ModelKey) -> PendingLoad {
        let loader = Arc::clone(&self.loader);
        let dispatcher = Arc::clone(&self.dispatcher);
        let slots = Arc::clone(&self.slots);
        let stats = Arc::clone(&self.stats);
        let load_guard = dispatcher.activity().begin_load();

        let task: JoinHandle<LoadOutcome> = tokio::spawn(async move {
            let _load_guard = load_guard;

            let attempt = {
                let key = key.clone();
                let stats = Arc::clone(&stats);
                move || load_with_retry(loader.as_ref(), &key, &stats)
            };
            let outcome = dispatcher
                .run_blocking(attempt)
                .await
                .unwrap_or_else(|e| Err(ModelError::Other(e.to_string())));

            publish(&slots, &stats, id, &key, &outcome);
            outcome
        });

        async move {
            task.await
                .unwrap_or_else(|e| Err(ModelError::Other(format!("model load task failed: {e}"))))
        }
        .boxed()
        .shared()
    }

    /// Evict entries idle for longer than the TTL.
    ///
    /// Returns the number of models evicted.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Evict entries whose last access is more than the TTL before `now`.
    /// Entries still checked out by a caller are kept.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let Some(ttl) = self.config.ttl() else {
            return 0;
        };

        let evicted: Vec<(ModelKey, CacheEntry)> = {
            let mut slots = lock(&self.slots);
            let expired: Vec<ModelKey> = slots
                .iter()
                .filter_map(|(key, slot)| match slot {
                    Slot::Ready(entry)
                        if now.saturating_duration_since(entry.last_accessed) > ttl
                            && !entry.is_in_use() =>
                    {
                        Some(key.clone())
                    }
                    _ => None,
                })
                .collect();

            expired
                .into_iter()
                .filter_map(|key| match slots.remove(&key) {
                    Some(Slot::Ready(entry)) => Some((key, entry)),
                    _ => None,
                })
                .collect()
        };

        for (key, entry) in &evicted {
            entry.model.unload();
            info!(
                model = %key,
                idle_secs = now.saturating_duration_since(entry.last_accessed).as_secs(),
                "Unloaded idle model"
            );
        }

        if !evicted.is_empty() {
            self.record(|stats| stats.total_evictions += evicted.len() as u64);
        }
        evicted.len()
    }

    /// Start a background task that sweeps every `sweep_interval` until
    /// `shutdown` is cancelled. Returns `None` when eviction is disabled.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.config.eviction_enabled() {
            return None;
        }

        let cache = Arc::clone(self);
        let period = self.config.sweep_interval();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        debug!("Model cache sweeper stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        cache.sweep();
                    }
                }
            }
        }))
    }

    /// Remove a specific model from the cache, tearing it down if loaded.
    ///
    /// Returns `true` if an entry was removed. Invalidating a key that is
    /// still loading detaches that load: its waiters still receive the
    /// result, but it is not cached.
    pub fn invalidate(&self, key: &ModelKey) -> bool {
        let removed = lock(&self.slots).remove(key);
        match removed {
            Some(Slot::Ready(entry)) => {
                entry.model.unload();
                self.record(|stats| stats.total_evictions += 1);
                info!(model = %key, "Removed model from cache");
                true
            }
            Some(Slot::Loading { .. }) => {
                info!(model = %key, "Detached in-progress load from cache");
                true
            }
            None => false,
        }
    }

    /// Tear down and remove every loaded model.
    pub fn clear(&self) {
        let drained: Vec<(ModelKey, Slot)> = lock(&self.slots).drain().collect();
        let mut cleared_count = 0u64;
        for (_, slot) in drained {
            if let Slot::Ready(entry) = slot {
                entry.model.unload();
                cleared_count += 1;
            }
        }
        self.record(|stats| stats.total_evictions += cleared_count);
        info!(cleared_count, "Cleared all models from cache");
    }

    /// Whether `key` is loaded (not merely loading).
    pub fn contains(&self, key: &ModelKey) -> bool {
        matches!(lock(&self.slots).get(key), Some(Slot::Ready(_)))
    }

    /// Get current cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let cache_size = lock(&self.slots)
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count();
        let mut result = self.stats.read().unwrap_or_else(PoisonError::into_inner).clone();
        result.cache_size = cache_size;
        result
    }

    /// Get the cache configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        update(&mut self.stats.write().unwrap_or_else(PoisonError::into_inner));
    }
}

fn lock(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Blocking load with a single clear-cache-and-retry on artifact failures.
fn load_with_retry(
    loader: &dyn ModelLoader,
    key: &ModelKey,
    stats: &RwLock<CacheStats>,
) -> LoadOutcome {
    let count_attempt = || {
        stats.write().unwrap_or_else(PoisonError::into_inner).total_load_attempts += 1;
    };

    count_attempt();
    match loader.load(key) {
        Err(e) if e.is_artifact_failure() => {
            warn!(model = %key, error = %e, "Failed to load model. Clearing cache and retrying");
            if let Err(clear_err) = loader.clear_cache(key) {
                warn!(model = %key, error = %clear_err, "Failed to clear model cache");
            }
            count_attempt();
            loader.load(key)
        }
        outcome => outcome,
    }
}

/// Move the slot for `key` out of `Loading`, if it still belongs to load `id`.
fn publish(
    slots: &Mutex<Slots>,
    stats: &RwLock<CacheStats>,
    id: u64,
    key: &ModelKey,
    outcome: &LoadOutcome,
) {
    let mut slots = lock(slots);
    let owned = matches!(slots.get(key), Some(Slot::Loading { id: current, .. }) if *current == id);

    match outcome {
        Ok(model) => {
            if owned {
                slots.insert(key.clone(), Slot::Ready(CacheEntry::new(Arc::clone(model))));
            }
            info!(model = %key, "Loaded model");
        }
        Err(e) => {
            // Failures are never cached: the next get starts a fresh load.
            if owned {
                slots.remove(key);
            }
            drop(slots);
            stats.write().unwrap_or_else(PoisonError::into_inner).total_load_failures += 1;
            warn!(model = %key, error = %e, "Model load failed");
        }
    }
}
