use std::collections::VecDeque;
use tracing::debug;

use super::decoder::DetectionEvent;
use super::record::{DetectionRecord, DisplayClock};

/// Default same-plate suppression window in seconds
pub const DEFAULT_WINDOW_SECS: f64 = 2.0;

/// Dedup key of the most recently admitted detection
#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    pub plate: String,
    pub timestamp: f64,
}

/// Collapses repeated recognitions of the same plate into single sightings
///
/// A detection is suppressed when it has the same plate as the last admitted
/// one and arrives less than `window` seconds after it, measured on the
/// event's own timestamp. Everything else is admitted into a history kept in
/// non-decreasing timestamp order, optionally capped with FIFO eviction.
#[derive(Debug)]
pub struct DedupEngine {
    window: f64,
    capacity: Option<usize>,
    display: DisplayClock,
    last_seen: Option<Fingerprint>,
    next_id: u64,
    history: VecDeque<DetectionRecord>,
    suppressed: u64,
}

impl DedupEngine {
    pub fn new(window_secs: f64, capacity: Option<usize>, display: DisplayClock) -> Self {
        Self {
            window: window_secs,
            capacity,
            display,
            last_seen: None,
            next_id: 1,
            history: VecDeque::new(),
            suppressed: 0,
        }
    }

    pub fn window(&self) -> f64 {
        self.window
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn last_seen(&self) -> Option<&Fingerprint> {
        self.last_seen.as_ref()
    }

    /// Feed a decoded event; events without a plate are ignored
    ///
    /// `fallback_timestamp` stamps events that carry no timestamp of their own.
    pub fn offer(
        &mut self,
        event: &DetectionEvent,
        fallback_timestamp: f64,
    ) -> Option<DetectionRecord> {
        let (plate, confidence) = event.detection()?;
        let timestamp = event.timestamp.unwrap_or(fallback_timestamp);
        self.admit(plate, confidence, timestamp)
    }

    /// Admit or suppress one detection; returns the new record when admitted
    pub fn admit(&mut self, plate: &str, confidence: f64, timestamp: f64) -> Option<DetectionRecord> {
        let plate = plate.trim();
        if plate.is_empty() || !(confidence > 0.0) || !timestamp.is_finite() {
            return None;
        }

        if let Some(last) = &self.last_seen {
            if last.plate == plate && timestamp - last.timestamp < self.window {
                self.suppressed += 1;
                debug!(
                    "Suppressed {} at {:.3}s (last seen {:.3}s)",
                    plate, timestamp, last.timestamp
                );
                return None;
            }
        }

        // Late events land at their sorted position
        let position = self.history.partition_point(|r| r.timestamp <= timestamp);

        // Older than everything a full history keeps: it would be evicted at once
        if position == 0 && self.capacity.is_some_and(|cap| self.history.len() >= cap) {
            debug!(
                "Dropped late {} at {:.3}s, older than the retained history",
                plate, timestamp
            );
            return None;
        }

        self.last_seen = Some(Fingerprint {
            plate: plate.to_string(),
            timestamp,
        });

        let record = DetectionRecord {
            id: self.next_id,
            plate: plate.to_string(),
            confidence,
            timestamp,
            display_time: self.display.format(timestamp),
        };
        self.next_id += 1;

        self.history.insert(position, record.clone());

        if let Some(capacity) = self.capacity {
            while self.history.len() > capacity {
                if let Some(evicted) = self.history.pop_front() {
                    debug!("History full, evicted #{} {}", evicted.id, evicted.plate);
                }
            }
        }

        Some(record)
    }

    /// Snapshot of the history, oldest first
    pub fn history(&self) -> Vec<DetectionRecord> {
        self.history.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Detections dropped as duplicates so far
    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    /// Start a fresh history; ids keep increasing
    pub fn reset(&mut self) {
        self.history.clear();
        self.last_seen = None;
        self.suppressed = 0;
    }
}
