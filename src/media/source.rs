use anyhow::Result;
use std::path::PathBuf;

use super::ffmpeg::{FfmpegSource, FfmpegSourceConfig};
use super::frame::SampledFrame;

/// Media source type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Live capture device; timestamps come from the session clock
    Camera,
    /// Seekable file-backed video; timestamps are the playback position
    File,
}

/// Lifecycle of a media source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Created, not started
    Idle,
    /// Producing frames
    Active,
    /// Paused by the user or the device; sampling stops
    Paused,
    /// End of stream reached
    Ended,
    /// Device or file handle released
    Released,
}

/// Media source capture trait
///
/// Implementations:
/// - Camera: ffmpeg capture from a device (v4l2/avfoundation/dshow)
/// - File: ffmpeg decode of a video file at real-time pace
#[async_trait::async_trait]
pub trait MediaSource: Send + Sync {
    /// Open the device/file and begin producing frames
    async fn start(&mut self) -> Result<()>;

    /// Latest bitmap, stamped with `timestamp`
    ///
    /// Returns an empty frame until the source has produced its first image.
    fn snapshot(&self, timestamp: f64) -> SampledFrame;

    /// Current playback/capture position in seconds
    fn position(&self) -> f64;

    /// Current frame dimensions, (0, 0) before the first frame
    fn dimensions(&self) -> (u32, u32);

    fn state(&self) -> SourceState;

    /// Stop the device tracks or playback and free the underlying handle
    async fn release(&mut self) -> Result<()>;

    fn kind(&self) -> SourceKind;

    /// Source name for logging
    fn name(&self) -> &str;
}

/// What the user selected as input
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceSpec {
    Camera {
        #[serde(default = "default_device")]
        device: String,
    },
    File { path: PathBuf },
}

fn default_device() -> String {
    "/dev/video0".to_string()
}

impl SourceSpec {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceSpec::Camera { .. } => SourceKind::Camera,
            SourceSpec::File { .. } => SourceKind::File,
        }
    }
}

/// Media source factory
pub struct MediaSourceFactory;

impl MediaSourceFactory {
    /// Create a media source for the selected input
    pub fn create(spec: SourceSpec, config: FfmpegSourceConfig) -> Result<Box<dyn MediaSource>> {
        match spec {
            SourceSpec::Camera { device } => Ok(Box::new(FfmpegSource::camera(device, config))),
            SourceSpec::File { path } => {
                if !path.is_file() {
                    anyhow::bail!("Video file not found: {}", path.display());
                }
                Ok(Box::new(FfmpegSource::file(path, config)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_spec_json() {
        let spec: SourceSpec = serde_json::from_str(r#"{"kind":"camera"}"#).unwrap();
        assert_eq!(
            spec,
            SourceSpec::Camera {
                device: "/dev/video0".to_string()
            }
        );
        assert_eq!(spec.kind(), SourceKind::Camera);

        let spec: SourceSpec =
            serde_json::from_str(r#"{"kind":"file","path":"clips/gate.mp4"}"#).unwrap();
        assert_eq!(spec.kind(), SourceKind::File);
    }

    #[test]
    fn test_factory_rejects_missing_file() {
        let spec = SourceSpec::File {
            path: PathBuf::from("no/such/clip.mp4"),
        };
        assert!(MediaSourceFactory::create(spec, FfmpegSourceConfig::default()).is_err());
    }
}
