//! Shared test utilities for vigil-serving integration tests.
//!
//! `FakeVideoCodec` stores videos in a tiny raw container so pipeline tests
//! run without ffmpeg while still going through real files.

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::{Rgb, RgbImage};
use vigil_abstraction::{
    DetectionModel, Frame, MediaError, ModelError, VideoCodec, VideoInfo, VideoReader, VideoWriter, VideoWriterSpec,
};
use vigil_serving::ModelKey;
use vigil_serving::ModelLoader;
use vigil_serving::detectors::{MockCounters, MockDetector, Schedule};

const MAGIC: &[u8; 4] = b"VGV1";
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// Write a video made of `frames` to `path`.
pub fn write_video(path: &Path, frame_rate: f64, frames: &[Frame]) {
    let (width, height) = frames.first().map_or((0, 0), RgbImage::dimensions);
    let mut bytes = header(width, height, frame_rate);
    for frame in frames {
        bytes.extend_from_slice(frame.as_raw());
    }
    std::fs::write(path, bytes).unwrap();
}

/// Read back a video written by the fake codec.
pub fn read_video(path: &Path) -> (VideoInfo, Vec<Frame>) {
    let codec = FakeVideoCodec::default();
    let mut reader = codec.open_reader(path).unwrap();
    let info = reader.info();
    let mut frames = Vec::new();
    while let Some(frame) = reader.next_frame().unwrap() {
        frames.push(frame);
    }
    (info, frames)
}

/// `count` flat grey frames.
pub fn grey_frames(count: usize, width: u32, height: u32) -> Vec<Frame> {
    (0..count).map(|_| RgbImage::from_pixel(width, height, Rgb([40, 40, 40]))).collect()
}

fn header(width: u32, height: u32, frame_rate: f64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&width.to_le_bytes());
    bytes.extend_from_slice(&height.to_le_bytes());
    bytes.extend_from_slice(&frame_rate.to_le_bytes());
    bytes
}

/// Video codec over the raw test container.
#[derive(Debug, Default, Clone)]
pub struct FakeVideoCodec {
    /// Fail `write_frame` once this many frames have been written.
    pub fail_writes_after: Option<usize>,
    /// Every writer spec requested, in order.
    pub writer_specs: Arc<Mutex<Vec<VideoWriterSpec>>>,
    /// Readers and writers currently open.
    pub open_handles: Arc<AtomicUsize>,
}

impl FakeVideoCodec {
    pub fn failing_after(frames: usize) -> Self {
        Self { fail_writes_after: Some(frames), ..Self::default() }
    }

    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }
}

impl VideoCodec for FakeVideoCodec {
    fn open_reader(&self, path: &Path) -> Result<Box<dyn VideoReader>, MediaError> {
        let bytes = std::fs::read(path)?;
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(MediaError::Decode(format!("{} is not a video", path.display())));
        }
        let width = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let height = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let frame_rate = f64::from_le_bytes(bytes[12..20].try_into().unwrap());

        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeReader {
            info: VideoInfo { frame_rate, width, height },
            data: bytes[HEADER_LEN..].to_vec(),
            offset: 0,
            handles: Arc::clone(&self.open_handles),
        }))
    }

    fn open_writer(&self, path: &Path, spec: VideoWriterSpec) -> Result<Box<dyn VideoWriter>, MediaError> {
        let mut file = std::fs::File::create(path)?;
        file.write_all(&header(spec.width, spec.height, spec.frame_rate))?;
        self.writer_specs.lock().unwrap().push(spec);
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeWriter {
            file,
            written: 0,
            fail_after: self.fail_writes_after,
            handles: Arc::clone(&self.open_handles),
        }))
    }
}

struct FakeReader {
    info: VideoInfo,
    data: Vec<u8>,
    offset: usize,
    handles: Arc<AtomicUsize>,
}

impl VideoReader for FakeReader {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, MediaError> {
        let frame_len = (self.info.width * self.info.height * 3) as usize;
        if self.offset == self.data.len() {
            return Ok(None);
        }
        if self.offset + frame_len > self.data.len() {
            return Err(MediaError::Decode("truncated frame".to_string()));
        }
        let raw = self.data[self.offset..self.offset + frame_len].to_vec();
        self.offset += frame_len;
        Ok(RgbImage::from_raw(self.info.width, self.info.height, raw))
    }
}

impl Drop for FakeReader {
    fn drop(&mut self) {
        self.handles.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FakeWriter {
    file: std::fs::File,
    written: usize,
    fail_after: Option<usize>,
    handles: Arc<AtomicUsize>,
}

impl VideoWriter for FakeWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), MediaError> {
        if self.fail_after.is_some_and(|limit| self.written >= limit) {
            return Err(MediaError::Encode("disk full".to_string()));
        }
        self.file.write_all(frame.as_raw())?;
        self.written += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<(), MediaError> {
        self.file.flush()?;
        Ok(())
    }
}

impl Drop for FakeWriter {
    fn drop(&mut self) {
        self.handles.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Loader handing out fresh mock detectors that share one set of counters.
#[derive(Debug)]
pub struct MockLoader {
    pub schedule: Schedule,
    pub counters: Arc<MockCounters>,
    pub loads: AtomicUsize,
}

impl MockLoader {
    pub fn new(schedule: Schedule) -> Self {
        Self { schedule, counters: Arc::new(MockCounters::default()), loads: AtomicUsize::new(0) }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModelLoader for MockLoader {
    fn load(&self, key: &ModelKey) -> Result<Arc<dyn DetectionModel>, ModelError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let model = MockDetector::new(key.name.clone(), self.schedule.clone()).with_counters(Arc::clone(&self.counters));
        Ok(Arc::new(model))
    }

    fn clear_cache(&self, _key: &ModelKey) -> Result<(), ModelError> {
        Ok(())
    }
}

/// Entries in `dir`, sorted.
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries.map(|e| e.unwrap().file_name().to_string_lossy().into_owned()).collect();
    names.sort();
    names
}
