pub mod encoder;
pub mod ffmpeg;
pub mod frame;
pub mod sampler;
pub mod schedule;
pub mod source;

pub use encoder::{EncodeFrame, FrameEncoder};
pub use ffmpeg::{FfmpegSource, FfmpegSourceConfig};
pub use frame::{EncodedFrame, SampledFrame};
pub use sampler::{FrameSampler, SamplerConfig, SamplerReport, StopReason};
pub use schedule::{Clock, FrameGate, ManualClock, SystemClock};
pub use source::{MediaSource, MediaSourceFactory, SourceKind, SourceSpec, SourceState};
