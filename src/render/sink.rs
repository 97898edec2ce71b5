use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::DynamicImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::surface::Surface;

/// Handling of decodes that complete out of arrival order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderPolicy {
    /// Paint whichever decode finished most recently
    #[default]
    LastDecodeWins,
    /// Never replace a frame with one that arrived earlier
    LatestSequence,
}

/// Paints annotated frames onto a surface, independent of the sampling cadence
pub struct RenderSink {
    painter: Painter,
    next_sequence: AtomicU64,
}

#[derive(Clone)]
struct Painter {
    surface: Arc<Mutex<Box<dyn Surface>>>,
    policy: RenderPolicy,
    last_painted: Arc<AtomicU64>,
    frames_painted: Arc<AtomicU64>,
    decode_failures: Arc<AtomicU64>,
}

impl RenderSink {
    pub fn new(surface: Box<dyn Surface>, policy: RenderPolicy) -> Self {
        Self {
            painter: Painter {
                surface: Arc::new(Mutex::new(surface)),
                policy,
                last_painted: Arc::new(AtomicU64::new(0)),
                frames_painted: Arc::new(AtomicU64::new(0)),
                decode_failures: Arc::new(AtomicU64::new(0)),
            },
            next_sequence: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> RenderPolicy {
        self.painter.policy
    }

    /// Decode `bytes` off the async threads and paint it when done
    ///
    /// The handle resolves to whether the image was painted.
    pub fn submit(&self, bytes: Vec<u8>) -> JoinHandle<bool> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let painter = self.painter.clone();

        tokio::task::spawn_blocking(move || match image::load_from_memory(&bytes) {
            Ok(image) => painter.paint(sequence, image),
            Err(e) => {
                painter.decode_failures.fetch_add(1, Ordering::SeqCst);
                warn!("Skipping undecodable annotated frame #{}: {}", sequence, e);
                false
            }
        })
    }

    /// Paint an already decoded image carrying arrival `sequence`
    pub fn paint(&self, sequence: u64, image: DynamicImage) -> bool {
        self.painter.paint(sequence, image)
    }

    /// Arrival sequence of the frame currently shown (0 = none)
    pub fn last_painted(&self) -> u64 {
        self.painter.last_painted.load(Ordering::SeqCst)
    }

    pub fn frames_painted(&self) -> u64 {
        self.painter.frames_painted.load(Ordering::SeqCst)
    }

    pub fn decode_failures(&self) -> u64 {
        self.painter.decode_failures.load(Ordering::SeqCst)
    }

    /// The shown frame as JPEG, for previews
    pub fn preview_jpeg(&self, quality: u8) -> Result<Option<Vec<u8>>> {
        let snapshot = {
            let surface = self.painter.lock();
            surface.snapshot()
        };
        let Some(rgba) = snapshot else {
            return Ok(None);
        };

        let rgb = DynamicImage::ImageRgba8(rgba).to_rgb8();
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, quality)
            .encode_image(&rgb)
            .context("Failed to encode preview")?;

        Ok(Some(bytes))
    }
}

impl Painter {
    fn lock(&self) -> std::sync::MutexGuard<'_, Box<dyn Surface>> {
        self.surface.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn paint(&self, sequence: u64, image: DynamicImage) -> bool {
        let rgba = image.to_rgba8();
        let mut surface = self.lock();

        if self.policy == RenderPolicy::LatestSequence
            && sequence < self.last_painted.load(Ordering::SeqCst)
        {
            debug!(
                "Dropping stale frame #{} (showing #{})",
                sequence,
                self.last_painted.load(Ordering::SeqCst)
            );
            return false;
        }

        let (width, height) = surface.dimensions();
        let scaled = if width == 0 || height == 0 || rgba.dimensions() == (width, height) {
            rgba
        } else {
            imageops::resize(&rgba, width, height, FilterType::Triangle)
        };

        surface.clear();
        surface.draw(&scaled);

        self.last_painted.store(sequence, Ordering::SeqCst);
        self.frames_painted.fetch_add(1, Ordering::SeqCst);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::ImageSurface;
    use image::{Rgba, RgbaImage};

    fn solid(width: u32, height: u32, value: u8) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255])))
    }

    fn shown_value(sink: &RenderSink) -> u8 {
        let surface = sink.painter.lock();
        surface.snapshot().unwrap().get_pixel(0, 0)[0]
    }

    #[test]
    fn test_last_decode_wins_paints_late_arrivals() {
        let sink = RenderSink::new(Box::new(ImageSurface::new(4, 4)), RenderPolicy::LastDecodeWins);

        // Frame 2 finishes decoding before frame 1
        assert!(sink.paint(2, solid(4, 4, 200)));
        assert!(sink.paint(1, solid(4, 4, 100)));

        assert_eq!(shown_value(&sink), 100);
        assert_eq!(sink.last_painted(), 1);
        assert_eq!(sink.frames_painted(), 2);
    }

    #[test]
    fn test_latest_sequence_drops_stale_decode() {
        let sink = RenderSink::new(Box::new(ImageSurface::new(4, 4)), RenderPolicy::LatestSequence);

        assert!(sink.paint(2, solid(4, 4, 200)));
        assert!(!sink.paint(1, solid(4, 4, 100)));

        assert_eq!(shown_value(&sink), 200);
        assert_eq!(sink.last_painted(), 2);
        assert_eq!(sink.frames_painted(), 1);
    }

    #[test]
    fn test_image_scaled_to_surface() {
        let sink = RenderSink::new(Box::new(ImageSurface::new(16, 9)), RenderPolicy::default());
        assert!(sink.paint(1, solid(64, 36, 50)));

        let surface = sink.painter.lock();
        assert_eq!(surface.snapshot().unwrap().dimensions(), (16, 9));
    }

    #[tokio::test]
    async fn test_submit_decodes_and_paints() {
        let sink = RenderSink::new(Box::new(ImageSurface::adaptive()), RenderPolicy::default());

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, 90)
            .encode_image(&solid(10, 10, 180).to_rgb8())
            .unwrap();

        assert!(sink.submit(jpeg).await.unwrap());
        assert_eq!(sink.frames_painted(), 1);

        let preview = sink.preview_jpeg(80).unwrap().unwrap();
        assert_eq!(&preview[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_submit_skips_garbage() {
        let sink = RenderSink::new(Box::new(ImageSurface::adaptive()), RenderPolicy::default());

        assert!(!sink.submit(b"definitely not a jpeg".to_vec()).await.unwrap());
        assert_eq!(sink.decode_failures(), 1);
        assert!(sink.preview_jpeg(80).unwrap().is_none());
    }
}
