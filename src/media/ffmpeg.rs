//! ffmpeg-backed media sources
//!
//! ffmpeg decodes the camera or video file, scales it to a fixed size and
//! writes raw RGB24 frames to stdout. A reader task keeps only the most recent
//! frame; the sampler takes snapshots of it at its own pace.

use anyhow::{Context, Result};
use image::RgbImage;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::frame::SampledFrame;
use super::source::{MediaSource, SourceKind, SourceState};
use crate::config::SamplingConfig;

/// Configuration for ffmpeg capture
#[derive(Debug, Clone)]
pub struct FfmpegSourceConfig {
    pub ffmpeg_path: String,
    /// Input format used for camera devices
    pub capture_format: String,
    /// Output frame width (frames are scaled)
    pub width: u32,
    /// Output frame height (frames are scaled)
    pub height: u32,
    /// Frames per second decoded from a file; defines playback position
    pub playback_fps: u32,
}

impl Default for FfmpegSourceConfig {
    fn default() -> Self {
        Self::from(&SamplingConfig::default())
    }
}

impl From<&SamplingConfig> for FfmpegSourceConfig {
    fn from(sampling: &SamplingConfig) -> Self {
        Self {
            ffmpeg_path: sampling.ffmpeg_path.clone(),
            capture_format: sampling.capture_format.clone(),
            width: sampling.frame_width,
            height: sampling.frame_height,
            playback_fps: sampling.playback_fps.max(1),
        }
    }
}

#[derive(Debug, Clone)]
enum Input {
    Camera(String),
    File(PathBuf),
}

/// Camera or video file decoded through an ffmpeg child process
pub struct FfmpegSource {
    input: Input,
    config: FfmpegSourceConfig,
    name: String,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    latest: Arc<watch::Sender<Option<Arc<RgbImage>>>>,
    state: Arc<watch::Sender<SourceState>>,
    frames_read: Arc<AtomicU64>,
    started_at: Option<Instant>,
}

impl FfmpegSource {
    pub fn camera(device: impl Into<String>, config: FfmpegSourceConfig) -> Self {
        let device = device.into();
        Self::new(format!("camera:{}", device), Input::Camera(device), config)
    }

    pub fn file(path: impl Into<PathBuf>, config: FfmpegSourceConfig) -> Self {
        let path = path.into();
        Self::new(format!("file:{}", path.display()), Input::File(path), config)
    }

    fn new(name: String, input: Input, config: FfmpegSourceConfig) -> Self {
        let (latest, _) = watch::channel(None);
        let (state, _) = watch::channel(SourceState::Idle);

        Self {
            input,
            config,
            name,
            child: None,
            reader: None,
            latest: Arc::new(latest),
            state: Arc::new(state),
            frames_read: Arc::new(AtomicU64::new(0)),
            started_at: None,
        }
    }

    /// Number of frames read from ffmpeg so far
    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::SeqCst)
    }

    fn command(&self) -> Command {
        let cfg = &self.config;
        let mut cmd = Command::new(&cfg.ffmpeg_path);
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");

        let filter = match &self.input {
            Input::Camera(device) => {
                cmd.arg("-f").arg(&cfg.capture_format).arg("-i").arg(device);
                format!("scale={}:{}", cfg.width, cfg.height)
            }
            Input::File(path) => {
                // -re paces decoding at the native frame rate, like a playing <video>
                cmd.arg("-re").arg("-i").arg(path);
                format!("fps={},scale={}:{}", cfg.playback_fps, cfg.width, cfg.height)
            }
        };

        cmd.arg("-vf")
            .arg(filter)
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-f")
            .arg("rawvideo")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        cmd
    }
}

#[async_trait::async_trait]
impl MediaSource for FfmpegSource {
    async fn start(&mut self) -> Result<()> {
        if self.child.is_some() {
            warn!("{} already started", self.name);
            return Ok(());
        }

        info!(
            "Starting {} ({}x{}) via {}",
            self.name, self.config.width, self.config.height, self.config.ffmpeg_path
        );

        let mut child = self
            .command()
            .spawn()
            .with_context(|| format!("Failed to spawn ffmpeg for {}", self.name))?;

        let stdout = child
            .stdout
            .take()
            .context("Failed to capture ffmpeg stdout")?;

        self.state.send_replace(SourceState::Active);
        self.started_at = Some(Instant::now());

        self.reader = Some(tokio::spawn(read_frames(
            stdout,
            self.config.width,
            self.config.height,
            Arc::clone(&self.latest),
            Arc::clone(&self.state),
            Arc::clone(&self.frames_read),
        )));
        self.child = Some(child);

        Ok(())
    }

    fn snapshot(&self, timestamp: f64) -> SampledFrame {
        match self.latest.borrow().as_ref() {
            Some(image) => SampledFrame::new(Arc::clone(image), timestamp),
            None => SampledFrame::empty(timestamp),
        }
    }

    fn position(&self) -> f64 {
        match self.input {
            Input::File(_) => {
                self.frames_read.load(Ordering::SeqCst) as f64 / self.config.playback_fps as f64
            }
            Input::Camera(_) => self
                .started_at
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or(0.0),
        }
    }

    fn dimensions(&self) -> (u32, u32) {
        self.latest
            .borrow()
            .as_ref()
            .map(|image| image.dimensions())
            .unwrap_or((0, 0))
    }

    fn state(&self) -> SourceState {
        *self.state.borrow()
    }

    async fn release(&mut self) -> Result<()> {
        if self.state() == SourceState::Released {
            return Ok(());
        }

        info!("Releasing {}", self.name);

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                // Already exited at end of stream
                debug!("ffmpeg kill for {}: {}", self.name, e);
            }
        }

        self.latest.send_replace(None);
        self.state.send_replace(SourceState::Released);

        Ok(())
    }

    fn kind(&self) -> SourceKind {
        match self.input {
            Input::Camera(_) => SourceKind::Camera,
            Input::File(_) => SourceKind::File,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

async fn read_frames(
    mut stdout: ChildStdout,
    width: u32,
    height: u32,
    latest: Arc<watch::Sender<Option<Arc<RgbImage>>>>,
    state: Arc<watch::Sender<SourceState>>,
    frames_read: Arc<AtomicU64>,
) {
    let frame_len = width as usize * height as usize * 3;
    let mut buf = vec![0u8; frame_len];

    loop {
        match stdout.read_exact(&mut buf).await {
            Ok(_) => match RgbImage::from_raw(width, height, buf.clone()) {
                Some(image) => {
                    latest.send_replace(Some(Arc::new(image)));
                    frames_read.fetch_add(1, Ordering::SeqCst);
                }
                None => warn!("Discarding short frame ({} bytes)", buf.len()),
            },
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                info!(
                    "ffmpeg reached end of stream after {} frames",
                    frames_read.load(Ordering::SeqCst)
                );
                break;
            }
            Err(e) => {
                error!("Failed to read frame from ffmpeg: {}", e);
                break;
            }
        }
    }

    state.send_if_modified(|s| match s {
        SourceState::Active => {
            *s = SourceState::Ended;
            true
        }
        _ => false,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unstarted_source_is_cold() {
        let source = FfmpegSource::camera("/dev/video0", FfmpegSourceConfig::default());

        assert_eq!(source.state(), SourceState::Idle);
        assert_eq!(source.dimensions(), (0, 0));
        assert_eq!(source.position(), 0.0);
        assert_eq!(source.snapshot(1.0).dimensions(), (0, 0));
        assert_eq!(source.kind(), SourceKind::Camera);
        assert_eq!(source.name(), "camera:/dev/video0");
    }

    #[test]
    fn test_file_command_paces_playback() {
        let config = FfmpegSourceConfig {
            playback_fps: 10,
            ..FfmpegSourceConfig::default()
        };
        let source = FfmpegSource::file("clips/gate.mp4", config);
        let cmd = source.command();
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert!(args.contains(&"-re".to_string()));
        assert!(args.contains(&"fps=10,scale=640:480".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("-"));
        assert_eq!(source.kind(), SourceKind::File);
    }

}
