use image::RgbImage;
use std::sync::Arc;

/// A bitmap pulled from a media source, stamped with its source-relative time
#[derive(Debug, Clone)]
pub struct SampledFrame {
    /// RGB pixels; empty (0x0) while the source has not produced anything yet
    pub image: Arc<RgbImage>,
    /// Seconds since source start (playback position or session wall-clock)
    pub timestamp: f64,
}

impl SampledFrame {
    pub fn new(image: Arc<RgbImage>, timestamp: f64) -> Self {
        Self { image, timestamp }
    }

    /// Frame with no pixels, produced by a source that is not warmed up
    pub fn empty(timestamp: f64) -> Self {
        Self {
            image: Arc::new(RgbImage::new(0, 0)),
            timestamp,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Compressed image bytes bound to the timestamp of the frame they came from
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    pub bytes: Vec<u8>,
    pub timestamp: f64,
}
