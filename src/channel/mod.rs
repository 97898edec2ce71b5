//! Recognition service channel
//!
//! One WebSocket per session. Outbound frames go through a single writer task
//! so each `frame_meta` text message is followed directly by its JPEG bytes.
//! Inbound text messages are forwarded raw to the session's event queue.

pub mod client;
pub mod messages;
pub mod state;

pub use client::{OutboundHandle, StreamingChannel};
pub use messages::{ChannelMessage, FrameMeta, InboundMessage};
pub use state::ConnectionState;
