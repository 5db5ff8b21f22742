//! Still-image codec backed by the `image` crate.

use std::io::Cursor;

use image::ImageFormat;
use image::codecs::jpeg::JpegEncoder;
use vigil_abstraction::{Frame, ImageCodec, MediaError};

/// Decodes any format the `image` crate recognises and encodes JPEG.
#[derive(Debug, Clone, Copy)]
pub struct ImageCrateCodec {
    quality: u8,
}

impl ImageCrateCodec {
    #[must_use]
    pub const fn new() -> Self {
        Self { quality: 90 }
    }

    /// JPEG quality, clamped to `1..=100`.
    #[must_use]
    pub fn with_quality(quality: u8) -> Self {
        Self { quality: quality.clamp(1, 100) }
    }
}

impl Default for ImageCrateCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCodec for ImageCrateCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Frame, MediaError> {
        let image = image::load_from_memory(bytes).map_err(|e| MediaError::Decode(e.to_string()))?;
        Ok(image.to_rgb8())
    }

    fn encode_jpeg(&self, frame: &Frame) -> Result<Vec<u8>, MediaError> {
        let mut buffer = Cursor::new(Vec::new());
        JpegEncoder::new_with_quality(&mut buffer, self.quality)
            .encode_image(frame)
            .map_err(|e| MediaError::Encode(e.to_string()))?;
        Ok(buffer.into_inner())
    }
}

/// Encode `frame` as PNG. Used to build lossless fixtures.
///
/// # Errors
/// Returns `MediaError::Encode` if encoding fails.
pub fn encode_png(frame: &Frame) -> Result<Vec<u8>, MediaError> {
    let mut buffer = Cursor::new(Vec::new());
    frame
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| MediaError::Encode(e.to_string()))?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_decode_png_and_encode_jpeg() {
        let frame = RgbImage::from_pixel(16, 8, Rgb([200, 30, 30]));
        let png = encode_png(&frame).unwrap();

        let codec = ImageCrateCodec::new();
        let decoded = codec.decode(&png).unwrap();
        assert_eq!(decoded, frame);

        let jpeg = codec.encode_jpeg(&decoded).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_decode_garbage_is_decode_error() {
        let err = ImageCrateCodec::default().decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, MediaError::Decode(_)));
    }

    #[test]
    fn test_quality_is_clamped() {
        assert_eq!(ImageCrateCodec::with_quality(0).quality, 1);
        assert_eq!(ImageCrateCodec::with_quality(255).quality, 100);
    }
}
