use super::config::{SessionConfig, SessionMode};
use super::stats::SessionStats;
use crate::channel::{ConnectionState, StreamingChannel};
use crate::detection::{decode, DedupEngine, DetectionRecord, DisplayClock};
use crate::export;
use crate::media::{
    Clock, EncodeFrame, FrameEncoder, FrameSampler, MediaSource, SamplerReport, SourceKind,
    SystemClock,
};
use crate::render::{ImageSurface, RenderSink, Surface};
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Admitted detections buffered for slow subscribers
const DETECTION_BROADCAST: usize = 64;
/// How long stop waits for queued inbound messages to drain
const DRAIN_GRACE: Duration = Duration::from_secs(2);

struct SamplerRun {
    cancel: CancellationToken,
    handle: JoinHandle<SamplerReport>,
}

#[derive(Default)]
struct InboundCounters {
    messages_received: AtomicU64,
    malformed_messages: AtomicU64,
    detections: AtomicU64,
}

/// A streaming session: samples a media source, ships frames to the
/// recognition service and collects the deduplicated detections it returns
pub struct StreamSession {
    /// Session configuration
    config: SessionConfig,

    /// Channel to the recognition service
    channel: Arc<StreamingChannel>,

    /// Timebase for live frames and untimed detections
    clock: Arc<dyn Clock>,

    /// Compression applied to sampled frames
    encoder: Arc<dyn EncodeFrame>,

    /// When the session was created
    started_at: chrono::DateTime<chrono::Utc>,

    /// Deduplicated detection history
    engine: Arc<Mutex<DedupEngine>>,

    /// Preview of annotated frames
    render: Arc<RenderSink>,

    detections_tx: broadcast::Sender<DetectionRecord>,

    counters: Arc<InboundCounters>,

    frames_sampled: Arc<AtomicU64>,

    /// Source selected but not yet started
    pending_source: Mutex<Option<Box<dyn MediaSource>>>,

    /// Running sampler, if any
    sampler: Mutex<Option<SamplerRun>>,

    /// Handle for the inbound message task
    inbound_task: Mutex<Option<JoinHandle<()>>>,

    /// True while the sampler loop runs
    sampling: Arc<watch::Sender<bool>>,

    /// Serializes concurrent stop requests
    stop_lock: Mutex<()>,
}

impl StreamSession {
    /// Create a new session with a preview surface that adopts the size of the
    /// first annotated frame
    pub fn new(config: SessionConfig) -> Self {
        Self::with_surface(config, Box::new(ImageSurface::adaptive()))
    }

    pub fn with_surface(config: SessionConfig, surface: Box<dyn Surface>) -> Self {
        info!("Creating streaming session: {}", config.session_id);

        let display = match config.kind {
            SourceKind::Camera => DisplayClock::wall_clock_now(),
            SourceKind::File => DisplayClock::Playback,
        };
        let engine = DedupEngine::new(config.dedup_window_secs, config.history_cap, display);
        let channel = StreamingChannel::new(config.endpoint.clone());
        let render = RenderSink::new(surface, config.render_policy);
        let (detections_tx, _) = broadcast::channel(DETECTION_BROADCAST);
        let (sampling, _) = watch::channel(false);
        let encoder = Arc::new(FrameEncoder::new(config.jpeg_quality));

        Self {
            config,
            channel: Arc::new(channel),
            clock: Arc::new(SystemClock::new()),
            encoder,
            started_at: Utc::now(),
            engine: Arc::new(Mutex::new(engine)),
            render: Arc::new(render),
            detections_tx,
            counters: Arc::new(InboundCounters::default()),
            frames_sampled: Arc::new(AtomicU64::new(0)),
            pending_source: Mutex::new(None),
            sampler: Mutex::new(None),
            inbound_task: Mutex::new(None),
            sampling: Arc::new(sampling),
            stop_lock: Mutex::new(()),
        }
    }

    /// Replace the JPEG encoder used for sampled frames
    pub fn with_encoder(mut self, encoder: Arc<dyn EncodeFrame>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn id(&self) -> &str {
        &self.config.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.channel.state()
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.channel.subscribe()
    }

    /// Receive each detection as it is admitted into the history
    pub fn subscribe_detections(&self) -> broadcast::Receiver<DetectionRecord> {
        self.detections_tx.subscribe()
    }

    pub fn is_sampling(&self) -> bool {
        *self.sampling.borrow()
    }

    /// Connect to the recognition service
    ///
    /// A no-op while already connected or connecting. A `stop` issued while
    /// the handshake is in progress abandons it.
    pub async fn connect(&self) -> Result<()> {
        // Held across the handshake so stop() drains whatever handler this installs
        let mut handle = self.inbound_task.lock().await;

        let Some(inbound_rx) = self
            .channel
            .connect()
            .await
            .context("Failed to connect to recognition service")?
        else {
            debug!(
                "Session {} not connecting, channel is {}",
                self.config.session_id,
                self.channel.state()
            );
            return Ok(());
        };

        let task = tokio::spawn(handle_inbound(
            inbound_rx,
            Arc::clone(&self.engine),
            Arc::clone(&self.render),
            Arc::clone(&self.clock),
            self.detections_tx.clone(),
            Arc::clone(&self.counters),
        ));

        // The previous handler ends on its own once its reader is gone
        if let Some(previous) = handle.replace(task) {
            if !previous.is_finished() {
                debug!("Replacing inbound handler of a stale connection");
            }
        }

        Ok(())
    }

    /// Select the source to sample on the next `start`
    pub async fn select_source(&self, source: Box<dyn MediaSource>) {
        info!("Selected source: {}", source.name());
        let mut pending = self.pending_source.lock().await;
        if let Some(mut previous) = pending.replace(source) {
            if let Err(e) = previous.release().await {
                warn!("Failed to release {}: {}", previous.name(), e);
            }
        }
    }

    /// Start sampling the selected source
    ///
    /// Returns `false` without side effects when no source is selected, the
    /// channel is not open, or sampling is already running.
    pub async fn start(&self) -> Result<bool> {
        let mut sampler = self.sampler.lock().await;

        if sampler.as_ref().is_some_and(|run| !run.handle.is_finished()) {
            warn!("Sampling already started");
            return Ok(false);
        }

        let outbound = match self.channel.outbound().await {
            Some(outbound) if outbound.is_open() => outbound,
            _ => {
                warn!("Cannot start sampling: recognition channel is not open");
                return Ok(false);
            }
        };

        let Some(mut source) = self.pending_source.lock().await.take() else {
            warn!("Cannot start sampling: no source selected");
            return Ok(false);
        };

        info!(
            "Starting session {} with {}",
            self.config.session_id,
            source.name()
        );

        if let Err(e) = source.start().await {
            if let Err(release_err) = source.release().await {
                warn!("Failed to release {}: {}", source.name(), release_err);
            }
            return Err(e.context(format!("Failed to start source {}", source.name())));
        }

        let frame_sampler = FrameSampler::new(
            self.config.sampler,
            Arc::clone(&self.encoder),
            Arc::clone(&self.clock),
        )
        .with_counter(Arc::clone(&self.frames_sampled));

        let cancel = CancellationToken::new();
        let sampling = Arc::clone(&self.sampling);
        sampling.send_replace(true);

        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let report = frame_sampler.run(source, outbound, token).await;
            sampling.send_replace(false);
            report
        });

        *sampler = Some(SamplerRun { cancel, handle });

        Ok(true)
    }

    /// Stop the session
    ///
    /// Cancels sampling, releases the source and closes the channel. Safe to
    /// call any number of times; only the first call does the work.
    pub async fn stop(&self) -> Result<SessionStats> {
        let _guard = self.stop_lock.lock().await;

        info!("Stopping session: {}", self.config.session_id);

        let run = self.sampler.lock().await.take();
        if let Some(run) = run {
            run.cancel.cancel();
            match run.handle.await {
                Ok(report) => info!(
                    "Sampler stopped ({:?}, {} frames sampled)",
                    report.reason, report.frames_sampled
                ),
                Err(e) => error!("Sampler task failed: {}", e),
            }
        }

        let unused = self.pending_source.lock().await.take();
        if let Some(mut source) = unused {
            if let Err(e) = source.release().await {
                warn!("Failed to release {}: {}", source.name(), e);
            }
        }

        // Abandons a handshake in progress, so connect() lets go of the handler slot
        let mut closed = self
            .channel
            .close()
            .await
            .context("Failed to close recognition channel")?;

        let mut handler = self.inbound_task.lock().await;

        // A connect that claimed the channel after the first close
        closed |= self
            .channel
            .close()
            .await
            .context("Failed to close recognition channel")?;

        // Let the handler drain whatever the reader queued before it stopped
        let task = handler.take();
        drop(handler);
        if let Some(mut task) = task {
            match tokio::time::timeout(DRAIN_GRACE, &mut task).await {
                Ok(Err(e)) => error!("Inbound handler failed: {}", e),
                Err(_) => {
                    warn!("Inbound handler did not drain in time");
                    task.abort();
                }
                Ok(Ok(())) => {}
            }
        }

        let stats = self.get_stats().await;
        if closed {
            info!(
                "Session {} stopped: {} detections from {} frames",
                self.config.session_id, stats.detections_count, stats.frames_sent
            );
        }

        Ok(stats)
    }

    /// Resolve once the sampler loop is no longer running
    pub async fn wait_until_idle(&self) {
        let mut rx = self.sampling.subscribe();
        while *rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Get current session statistics
    pub async fn get_stats(&self) -> SessionStats {
        let (history_len, suppressed_count) = {
            let engine = self.engine.lock().await;
            (engine.len(), engine.suppressed())
        };

        let duration = Utc::now().signed_duration_since(self.started_at);

        SessionStats {
            session_id: self.config.session_id.clone(),
            mode: SessionMode::from(self.config.kind),
            connection: self.channel.state(),
            is_sampling: self.is_sampling(),
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            frames_sampled: self.frames_sampled.load(Ordering::SeqCst),
            frames_sent: self.channel.frames_sent(),
            messages_received: self.counters.messages_received.load(Ordering::SeqCst),
            malformed_messages: self.counters.malformed_messages.load(Ordering::SeqCst),
            detections_count: self.counters.detections.load(Ordering::SeqCst),
            suppressed_count,
            history_len,
            frames_painted: self.render.frames_painted(),
        }
    }

    /// Detection history sorted by timestamp
    pub async fn history(&self) -> Vec<DetectionRecord> {
        self.engine.lock().await.history()
    }

    /// Clear the history and the duplicate fingerprint
    pub async fn reset_history(&self) {
        self.engine.lock().await.reset();
    }

    /// History as CSV text
    pub async fn export_csv(&self) -> Result<String> {
        let records = self.history().await;
        export::export_csv(&records)
    }

    /// Latest annotated frame as JPEG
    pub fn preview_jpeg(&self) -> Result<Option<Vec<u8>>> {
        let quality = FrameEncoder::new(self.config.jpeg_quality).quality_percent();
        self.render.preview_jpeg(quality)
    }
}

/// Decode, render and deduplicate inbound messages until the reader goes away
async fn handle_inbound(
    mut inbound_rx: mpsc::Receiver<String>,
    engine: Arc<Mutex<DedupEngine>>,
    render: Arc<RenderSink>,
    clock: Arc<dyn Clock>,
    detections_tx: broadcast::Sender<DetectionRecord>,
    counters: Arc<InboundCounters>,
) {
    info!("Inbound handler started");

    while let Some(text) = inbound_rx.recv().await {
        counters.messages_received.fetch_add(1, Ordering::SeqCst);

        let Some(mut event) = decode(&text) else {
            counters.malformed_messages.fetch_add(1, Ordering::SeqCst);
            continue;
        };

        if let Some(bytes) = event.annotated_frame.take() {
            // Painting runs on its own; the render policy orders it
            drop(render.submit(bytes));
        }

        let fallback = clock.now().as_secs_f64();
        let admitted = engine.lock().await.offer(&event, fallback);

        if let Some(record) = admitted {
            counters.detections.fetch_add(1, Ordering::SeqCst);
            info!(
                "Detected {} ({}) at {}",
                record.plate,
                export::confidence_percent(record.confidence),
                record.display_time
            );
            // No subscribers is fine
            let _ = detections_tx.send(record);
        }
    }

    info!("Inbound handler stopped");
}
