//! Codec boundary: image encode/decode and video read/write.
//!
//! The serving core only sees these traits; concrete codecs live in
//! `vigil-serving::media`.

use std::fmt;
use std::path::Path;

use thiserror::Error;

use crate::Frame;

/// Errors raised by media codecs.
#[derive(Error, Debug)]
pub enum MediaError {
    /// The input could not be decoded.
    #[error("Failed to decode media: {0}")]
    Decode(String),

    /// A frame could not be encoded or written.
    #[error("Failed to encode media: {0}")]
    Encode(String),

    /// The codec backend is unavailable or misbehaved.
    #[error("Codec backend error: {0}")]
    Backend(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Four-character codec tag used when opening a video writer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    /// Parses a tag such as `"avc1"`; returns `None` unless it is exactly four
    /// ASCII characters.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        let bytes = tag.as_bytes();
        if bytes.len() != 4 || !bytes.iter().all(u8::is_ascii_graphic) {
            return None;
        }
        Some(Self([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// The tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self.as_str())
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream properties reported by a video reader.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    /// Frames per second.
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
}

/// Parameters for opening a video writer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoWriterSpec {
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
    pub codec: FourCc,
}

impl VideoWriterSpec {
    /// Writer parameters matching a source stream.
    #[must_use]
    pub const fn matching(info: VideoInfo, codec: FourCc) -> Self {
        Self {
            frame_rate: info.frame_rate,
            width: info.width,
            height: info.height,
            codec,
        }
    }
}

/// Decodes and encodes still images.
pub trait ImageCodec: Send + Sync {
    /// Decodes encoded image bytes into a frame.
    ///
    /// # Errors
    /// Returns `MediaError::Decode` for unreadable input.
    fn decode(&self, bytes: &[u8]) -> Result<Frame, MediaError>;

    /// Encodes a frame as JPEG.
    ///
    /// # Errors
    /// Returns `MediaError::Encode` if encoding fails.
    fn encode_jpeg(&self, frame: &Frame) -> Result<Vec<u8>, MediaError>;
}

/// An open video source. The handle is released when dropped.
pub trait VideoReader: Send {
    fn info(&self) -> VideoInfo;

    /// Reads the next frame, or `None` at end of stream.
    ///
    /// # Errors
    /// Returns `MediaError::Decode` if the stream is corrupt.
    fn next_frame(&mut self) -> Result<Option<Frame>, MediaError>;
}

/// An open video destination. Dropping without `finish` discards pending
/// output but still releases the handle.
pub trait VideoWriter: Send {
    /// Appends one frame.
    ///
    /// # Errors
    /// Returns `MediaError::Encode` if the frame cannot be written.
    fn write_frame(&mut self, frame: &Frame) -> Result<(), MediaError>;

    /// Flushes and closes the container.
    ///
    /// # Errors
    /// Returns `MediaError` if finalizing the output fails.
    fn finish(self: Box<Self>) -> Result<(), MediaError>;
}

/// Opens video readers and writers.
pub trait VideoCodec: Send + Sync {
    /// # Errors
    /// Returns `MediaError` if the file is missing or not a video.
    fn open_reader(&self, path: &Path) -> Result<Box<dyn VideoReader>, MediaError>;

    /// # Errors
    /// Returns `MediaError` if the destination cannot be created.
    fn open_writer(
        &self,
        path: &Path,
        spec: VideoWriterSpec,
    ) -> Result<Box<dyn VideoWriter>, MediaError>;
}
