//! Video codec that drives the `ffmpeg` and `ffprobe` executables.
//!
//! Frames cross the process boundary as raw RGB24 over pipes. `ffprobe`
//! supplies the frame rate and dimensions of a source before decoding starts.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde::Deserialize;
use tracing::{debug, warn};
use vigil_abstraction::{FourCc, Frame, MediaError, VideoCodec, VideoInfo, VideoReader, VideoWriter, VideoWriterSpec};

const BYTES_PER_PIXEL: usize = 3;
const STDERR_TAIL_BYTES: usize = 1024;

/// Video codec backed by ffmpeg subprocesses.
#[derive(Debug, Clone)]
pub struct FfmpegVideoCodec {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegVideoCodec {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegVideoCodec {
    #[must_use]
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self { ffmpeg: ffmpeg.into(), ffprobe: ffprobe.into() }
    }

    /// Read stream properties of the first video stream in `path`.
    ///
    /// # Errors
    /// Returns `MediaError::Backend` if ffprobe cannot run and
    /// `MediaError::Decode` if the file has no usable video stream.
    pub fn probe(&self, path: &Path) -> Result<VideoInfo, MediaError> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-select_streams", "v:0"])
            .args(["-show_entries", "stream=width,height,r_frame_rate,avg_frame_rate"])
            .args(["-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| spawn_error(&self.ffprobe, &e))?;

        if !output.status.success() {
            return Err(MediaError::Decode(format!(
                "ffprobe failed on {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_probe_output(&output.stdout)
    }
}

impl VideoCodec for FfmpegVideoCodec {
    fn open_reader(&self, path: &Path) -> Result<Box<dyn VideoReader>, MediaError> {
        if !path.is_file() {
            return Err(MediaError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("video not found: {}", path.display()),
            )));
        }
        let info = self.probe(path)?;

        let stderr = StderrLog::new()?;
        let mut child = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(stderr.stdio()?)
            .spawn()
            .map_err(|e| spawn_error(&self.ffmpeg, &e))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::Backend("ffmpeg stdout was not captured".to_string()))?;

        debug!(path = %path.display(), width = info.width, height = info.height, fps = info.frame_rate, "Opened video reader");
        Ok(Box::new(FfmpegReader {
            child: Some(child),
            stdout,
            stderr,
            info,
            frame_len: frame_len(info.width, info.height),
        }))
    }

    fn open_writer(&self, path: &Path, spec: VideoWriterSpec) -> Result<Box<dyn VideoWriter>, MediaError> {
        let encoder = encoder_for(spec.codec)
            .ok_or_else(|| MediaError::Backend(format!("no ffmpeg encoder for codec tag '{}'", spec.codec)))?;

        let stderr = StderrLog::new()?;
        let mut child = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-y", "-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{}x{}", spec.width, spec.height)])
            .args(["-r", &spec.frame_rate.to_string()])
            .args(["-i", "-", "-an", "-c:v", encoder, "-pix_fmt", "yuv420p"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(stderr.stdio()?)
            .spawn()
            .map_err(|e| spawn_error(&self.ffmpeg, &e))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::Backend("ffmpeg stdin was not captured".to_string()))?;

        debug!(path = %path.display(), encoder, "Opened video writer");
        Ok(Box::new(FfmpegWriter {
            child: Some(child),
            stdin: Some(stdin),
            stderr,
            spec,
            path: path.to_path_buf(),
        }))
    }
}

struct FfmpegReader {
    child: Option<Child>,
    stdout: ChildStdout,
    stderr: StderrLog,
    info: VideoInfo,
    frame_len: usize,
}

impl VideoReader for FfmpegReader {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, MediaError> {
        let mut buf = vec![0u8; self.frame_len];
        let mut filled = 0;
        while filled < buf.len() {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(MediaError::Io(e)),
            }
        }

        if filled == 0 {
            if let Some(mut child) = self.child.take() {
                let status = child.wait()?;
                if !status.success() {
                    return Err(MediaError::Decode(
                        self.stderr.annotate(format!("ffmpeg decoder exited with {status}")),
                    ));
                }
            }
            return Ok(None);
        }
        if filled < buf.len() {
            return Err(MediaError::Decode(format!(
                "truncated frame: got {filled} of {} bytes",
                buf.len()
            )));
        }

        Frame::from_raw(self.info.width, self.info.height, buf)
            .map(Some)
            .ok_or_else(|| MediaError::Decode("frame buffer has the wrong size".to_string()))
    }
}

impl Drop for FfmpegReader {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

struct FfmpegWriter {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr: StderrLog,
    spec: VideoWriterSpec,
    path: PathBuf,
}

impl VideoWriter for FfmpegWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), MediaError> {
        if frame.dimensions() != (self.spec.width, self.spec.height) {
            return Err(MediaError::Encode(format!(
                "frame is {}x{}, writer expects {}x{}",
                frame.width(),
                frame.height(),
                self.spec.width,
                self.spec.height
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| MediaError::Encode("writer already closed".to_string()))?;
        stdin.write_all(frame.as_raw()).map_err(|e| {
            MediaError::Encode(self.stderr.annotate(format!("ffmpeg encoder stopped accepting frames: {e}")))
        })
    }

    fn finish(mut self: Box<Self>) -> Result<(), MediaError> {
        // Closing stdin signals end of stream.
        drop(self.stdin.take());
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait()?;
        if status.success() {
            debug!(path = %self.path.display(), "Video writer finished");
            Ok(())
        } else {
            let message = format!("ffmpeg encoder exited with {status} writing {}", self.path.display());
            Err(MediaError::Encode(self.stderr.annotate(message)))
        }
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            warn!(path = %self.path.display(), "Video writer dropped before finish");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// A child's stderr, kept in an anonymous file. An unread pipe could stall
/// the child once its buffer fills.
struct StderrLog {
    file: File,
}

impl StderrLog {
    fn new() -> Result<Self, MediaError> {
        Ok(Self { file: tempfile::tempfile()? })
    }

    fn stdio(&self) -> Result<Stdio, MediaError> {
        Ok(Stdio::from(self.file.try_clone()?))
    }

    /// Append the end of what the child logged to `message`.
    fn annotate(&mut self, message: String) -> String {
        let mut logged = Vec::new();
        if let Err(e) = self.file.seek(SeekFrom::Start(0)).and_then(|_| self.file.read_to_end(&mut logged)) {
            warn!(error = %e, "Failed to read ffmpeg stderr");
        }
        with_tail(message, &String::from_utf8_lossy(&logged))
    }
}

fn with_tail(message: String, logged: &str) -> String {
    let logged = logged.trim();
    if logged.is_empty() {
        return message;
    }
    let mut start = logged.len().saturating_sub(STDERR_TAIL_BYTES);
    while !logged.is_char_boundary(start) {
        start += 1;
    }
    format!("{message}: {}", &logged[start..])
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

fn parse_probe_output(json: &[u8]) -> Result<VideoInfo, MediaError> {
    let probe: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| MediaError::Decode(format!("unreadable ffprobe output: {e}")))?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| MediaError::Decode("no video stream".to_string()))?;

    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        return Err(MediaError::Decode("video stream has no dimensions".to_string()));
    };
    if width == 0 || height == 0 {
        return Err(MediaError::Decode(format!("invalid video size {width}x{height}")));
    }
    let frame_rate = [stream.avg_frame_rate, stream.r_frame_rate]
        .into_iter()
        .flatten()
        .find_map(|rate| parse_frame_rate(&rate))
        .ok_or_else(|| MediaError::Decode("video stream has no frame rate".to_string()))?;

    Ok(VideoInfo { frame_rate, width, height })
}

/// Parse `"30000/1001"` or `"25"` style rates. Zero and undefined rates
/// yield `None`.
fn parse_frame_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

/// ffmpeg encoder for a container codec tag.
fn encoder_for(codec: FourCc) -> Option<&'static str> {
    match codec.as_str().to_ascii_lowercase().as_str() {
        "avc1" | "h264" | "x264" => Some("libx264"),
        "hvc1" | "hev1" | "hevc" => Some("libx265"),
        "mp4v" | "fmp4" => Some("mpeg4"),
        "mjpg" => Some("mjpeg"),
        "vp80" => Some("libvpx"),
        "vp90" | "vp09" => Some("libvpx-vp9"),
        _ => None,
    }
}

fn frame_len(width: u32, height: u32) -> usize {
    usize::try_from(width).unwrap_or(0) * usize::try_from(height).unwrap_or(0) * BYTES_PER_PIXEL
}

fn spawn_error(program: &Path, err: &std::io::Error) -> MediaError {
    if err.kind() == ErrorKind::NotFound {
        MediaError::Backend(format!("{} not found on PATH", program.display()))
    } else {
        MediaError::Backend(format!("failed to run {}: {err}", program.display()))
    }
}
