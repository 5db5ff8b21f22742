//! Concrete codecs behind the `vigil_abstraction` media traits.

pub mod ffmpeg;
pub mod image_codec;

pub use ffmpeg::FfmpegVideoCodec;
pub use image_codec::{ImageCrateCodec, encode_png};
