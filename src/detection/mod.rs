//! Inbound detection handling: decoding and deduplication

pub mod decoder;
pub mod dedup;
pub mod record;

pub use decoder::{decode, DetectionEvent};
pub use dedup::{DedupEngine, Fingerprint, DEFAULT_WINDOW_SECS};
pub use record::{DetectionRecord, DisplayClock};
