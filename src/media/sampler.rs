use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::encoder::EncodeFrame;
use super::frame::SampledFrame;
use super::schedule::{Clock, FrameGate};
use super::source::{MediaSource, SourceKind, SourceState};
use crate::channel::OutboundHandle;
use crate::config::SamplingConfig;

/// Timing of the sampler loop
#[derive(Debug, Clone, Copy)]
pub struct SamplerConfig {
    /// Minimum time between accepted samples (~6-7 per second at 150 ms)
    pub min_interval: Duration,
    /// Redraw tick period driving the loop
    pub redraw_interval: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self::from(&SamplingConfig::default())
    }
}

impl From<&SamplingConfig> for SamplerConfig {
    fn from(sampling: &SamplingConfig) -> Self {
        Self {
            min_interval: Duration::from_millis(sampling.min_interval_ms),
            redraw_interval: Duration::from_secs_f64(1.0 / sampling.redraw_hz.max(1) as f64),
        }
    }
}

/// Why the sampler loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Session stopped by the user
    Cancelled,
    /// Source paused, ended or was released
    SourceInactive(SourceState),
    /// Recognition channel no longer open
    ChannelClosed,
}

/// Outcome of one sampler run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerReport {
    pub reason: StopReason,
    pub frames_sampled: u64,
}

/// Redraw-synchronized frame sampler
///
/// Each tick checks, in order: cancellation, source state, channel state,
/// the in-flight encode, and the minimum-interval gate. Ticks that fail a
/// check are skipped without ending the loop unless the check is terminal.
pub struct FrameSampler {
    config: SamplerConfig,
    encoder: Arc<dyn EncodeFrame>,
    clock: Arc<dyn Clock>,
    frames_sampled: Arc<AtomicU64>,
}

impl FrameSampler {
    pub fn new(
        config: SamplerConfig,
        encoder: Arc<dyn EncodeFrame>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            encoder,
            clock,
            frames_sampled: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Count samples into an existing counter
    pub fn with_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.frames_sampled = counter;
        self
    }

    /// Shared counter of frames handed to the encoder
    pub fn frames_sampled(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.frames_sampled)
    }

    /// Sample `source` until cancelled, the source stops, or the channel closes
    ///
    /// The source is released before this returns, and no frame is queued on
    /// `outbound` afterwards.
    pub async fn run(
        self,
        mut source: Box<dyn MediaSource>,
        outbound: OutboundHandle,
        cancel: CancellationToken,
    ) -> SamplerReport {
        let mut ticker = tokio::time::interval(self.config.redraw_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut gate = FrameGate::new(self.config.min_interval);
        let mut in_flight: Option<JoinHandle<()>> = None;
        let started = self.frames_sampled.load(Ordering::SeqCst);

        info!(
            "Sampling {} every {:?} (redraw {:?})",
            source.name(),
            self.config.min_interval,
            self.config.redraw_interval
        );

        let reason = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Cancelled,
                _ = ticker.tick() => {}
            }

            let state = source.state();
            if state != SourceState::Active {
                break StopReason::SourceInactive(state);
            }

            if !outbound.is_open() {
                break StopReason::ChannelClosed;
            }

            // One encode at a time keeps binary payloads in metadata order
            if in_flight.as_ref().is_some_and(|task| !task.is_finished()) {
                continue;
            }

            let now = self.clock.now();
            if !gate.try_accept(now) {
                continue;
            }

            let timestamp = match source.kind() {
                SourceKind::File => source.position(),
                SourceKind::Camera => now.as_secs_f64(),
            };
            let frame = source.snapshot(timestamp);
            self.frames_sampled.fetch_add(1, Ordering::SeqCst);

            in_flight = Some(spawn_encode(
                Arc::clone(&self.encoder),
                frame,
                outbound.clone(),
                cancel.clone(),
            ));
        };

        if let Some(task) = in_flight.take() {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!("Encode task panicked: {}", e);
                }
            }
        }

        if let Err(e) = source.release().await {
            error!("Failed to release {}: {:#}", source.name(), e);
        }

        let frames_sampled = self.frames_sampled.load(Ordering::SeqCst) - started;
        info!(
            "Sampler for {} stopped: {:?} ({} frames sampled)",
            source.name(),
            reason,
            frames_sampled
        );

        SamplerReport {
            reason,
            frames_sampled,
        }
    }
}

fn spawn_encode(
    encoder: Arc<dyn EncodeFrame>,
    frame: SampledFrame,
    outbound: OutboundHandle,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let encoded = tokio::task::spawn_blocking(move || encoder.encode(&frame)).await;

        match encoded {
            Ok(Ok(Some(frame))) => {
                if cancel.is_cancelled() {
                    return;
                }
                let timestamp = frame.timestamp;
                if !outbound.send_frame(frame) {
                    debug!("Frame at {:.3}s not queued", timestamp);
                }
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!("Skipping frame: {:#}", e),
            Err(e) => error!("Encode worker failed: {}", e),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_sampling() {
        let config = SamplerConfig::from(&SamplingConfig::default());
        assert_eq!(config.min_interval, Duration::from_millis(150));
        assert!(config.redraw_interval < Duration::from_millis(17));
    }
}
