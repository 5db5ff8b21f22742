//! Scripted detector for tests and dry runs.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;
use vigil_abstraction::{BoundingBox, Detection, DetectionModel, DetectionSet, Frame, ModelError};

use crate::render::draw_detections;

/// Call counters shared between a mock and whoever inspects it.
#[derive(Debug, Default)]
pub struct MockCounters {
    pub predict_calls: AtomicUsize,
    pub track_calls: AtomicUsize,
    pub resets: AtomicUsize,
    pub unloads: AtomicUsize,
}

impl MockCounters {
    #[must_use]
    pub fn predict_calls(&self) -> usize {
        self.predict_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn track_calls(&self) -> usize {
        self.track_calls.load(Ordering::SeqCst)
    }
}

/// Which calls produce a detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Never,
    Always,
    /// Zero-based call indices: predict calls for images, frame positions
    /// since the last `reset_tracking` for video.
    Calls(BTreeSet<usize>),
}

impl Schedule {
    fn fires(&self, index: usize) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::Calls(indices) => indices.contains(&index),
        }
    }
}

/// A mock implementation of `DetectionModel` that reports one centred box
/// according to its schedule.
#[derive(Debug)]
pub struct MockDetector {
    id: String,
    schedule: Schedule,
    score: f32,
    counters: Arc<MockCounters>,
    stream_position: AtomicUsize,
}

impl MockDetector {
    /// Creates a `MockDetector` following `schedule`.
    #[must_use]
    pub fn new(id: impl Into<String>, schedule: Schedule) -> Self {
        Self {
            id: id.into(),
            schedule,
            score: 0.9,
            counters: Arc::new(MockCounters::default()),
            stream_position: AtomicUsize::new(0),
        }
    }

    /// A detector that never finds anything.
    #[must_use]
    pub fn never(id: impl Into<String>) -> Self {
        Self::new(id, Schedule::Never)
    }

    /// A detector that finds something in every frame.
    #[must_use]
    pub fn always(id: impl Into<String>) -> Self {
        Self::new(id, Schedule::Always)
    }

    /// A detector that fires on the given zero-based calls.
    #[must_use]
    pub fn on_calls(id: impl Into<String>, calls: impl IntoIterator<Item = usize>) -> Self {
        Self::new(id, Schedule::Calls(calls.into_iter().collect()))
    }

    /// Score attached to reported detections.
    #[must_use]
    pub const fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    /// Share `counters` instead of a private set.
    #[must_use]
    pub fn with_counters(mut self, counters: Arc<MockCounters>) -> Self {
        self.counters = counters;
        self
    }

    #[must_use]
    pub fn counters(&self) -> Arc<MockCounters> {
        Arc::clone(&self.counters)
    }

    fn detect(&self, frame: &Frame, confidence: f32, index: usize, track_id: Option<u32>) -> DetectionSet {
        if !self.schedule.fires(index) {
            return DetectionSet::default();
        }

        let (width, height) = frame.dimensions();
        let detection = Detection {
            label: "weapon".to_string(),
            score: self.score,
            bbox: BoundingBox {
                x1: width / 4,
                y1: height / 4,
                x2: width - width / 4,
                y2: height - height / 4,
            },
            track_id,
        };
        DetectionSet::new(vec![detection]).above(confidence)
    }
}

impl DetectionModel for MockDetector {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn predict(&self, frame: &Frame, confidence: f32) -> Result<DetectionSet, ModelError> {
        let index = self.counters.predict_calls.fetch_add(1, Ordering::SeqCst);
        debug!(model_id = %self.id, index, confidence, "MockDetector predicting");
        Ok(self.detect(frame, confidence, index, None))
    }

    fn track(&self, frame: &Frame, confidence: f32) -> Result<DetectionSet, ModelError> {
        self.counters.track_calls.fetch_add(1, Ordering::SeqCst);
        let position = self.stream_position.fetch_add(1, Ordering::SeqCst);
        Ok(self.detect(frame, confidence, position, Some(1)))
    }

    fn reset_tracking(&self) {
        self.stream_position.store(0, Ordering::SeqCst);
        self.counters.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn render(&self, frame: &Frame, detections: &DetectionSet) -> Frame {
        draw_detections(frame, detections)
    }

    fn unload(&self) {
        self.counters.unloads.fetch_add(1, Ordering::SeqCst);
    }
}
