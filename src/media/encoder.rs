use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use tracing::debug;

use super::frame::{EncodedFrame, SampledFrame};

/// Default JPEG quality, favouring throughput over fidelity
pub const DEFAULT_QUALITY: f32 = 0.8;

/// Turns sampled bitmaps into wire payloads
///
/// Runs on a blocking worker, so implementations may take their time.
pub trait EncodeFrame: Send + Sync {
    /// `Ok(None)` means the frame is skipped
    fn encode(&self, frame: &SampledFrame) -> Result<Option<EncodedFrame>>;
}

/// JPEG compression of sampled frames at a fixed quality
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    /// Quality on a 0-1 scale
    quality: f32,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_QUALITY)
    }
}

impl FrameEncoder {
    pub fn new(quality: f32) -> Self {
        let quality = if quality.is_finite() {
            quality.clamp(0.01, 1.0)
        } else {
            DEFAULT_QUALITY
        };
        Self { quality }
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    /// Quality mapped onto the encoder's 1-100 scale
    pub fn quality_percent(&self) -> u8 {
        (self.quality * 100.0).round().clamp(1.0, 100.0) as u8
    }

    /// Compress a frame to JPEG
    ///
    /// Returns `Ok(None)` when the frame has no pixels (device not warmed up);
    /// the caller skips it.
    pub fn encode(&self, frame: &SampledFrame) -> Result<Option<EncodedFrame>> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            debug!("Skipping empty frame at {:.3}s", frame.timestamp);
            return Ok(None);
        }

        let mut bytes = Vec::with_capacity(width as usize * height as usize / 4);
        JpegEncoder::new_with_quality(&mut bytes, self.quality_percent())
            .encode_image(frame.image.as_ref())
            .context("Failed to encode frame as JPEG")?;

        if bytes.is_empty() {
            return Ok(None);
        }

        Ok(Some(EncodedFrame {
            bytes,
            timestamp: frame.timestamp,
        }))
    }
}

impl EncodeFrame for FrameEncoder {
    fn encode(&self, frame: &SampledFrame) -> Result<Option<EncodedFrame>> {
        FrameEncoder::encode(self, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::sync::Arc;

    #[test]
    fn test_empty_frame_is_skipped() {
        let encoder = FrameEncoder::default();
        let result = encoder.encode(&SampledFrame::empty(0.5)).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_encode_produces_jpeg_with_timestamp() {
        let image = RgbImage::from_pixel(32, 24, Rgb([200, 40, 40]));
        let frame = SampledFrame::new(Arc::new(image), 3.25);

        let encoded = FrameEncoder::new(0.7).encode(&frame).unwrap().unwrap();

        assert_eq!(&encoded.bytes[..2], &[0xFF, 0xD8], "JPEG start-of-image marker");
        assert_eq!(encoded.timestamp, 3.25);

        let decoded = image::load_from_memory(&encoded.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn test_quality_mapping() {
        assert_eq!(FrameEncoder::new(0.7).quality_percent(), 70);
        assert_eq!(FrameEncoder::new(2.0).quality_percent(), 100);
        assert_eq!(FrameEncoder::new(0.0).quality_percent(), 1);
        assert_eq!(FrameEncoder::new(f32::NAN).quality(), DEFAULT_QUALITY);
    }
}
