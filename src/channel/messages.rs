use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;

/// Metadata text message sent immediately before each binary frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "frame_meta")]
pub struct FrameMeta {
    /// Source-relative seconds of the frame that follows
    pub timestamp: f64,
}

/// Outbound message on the recognition channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Metadata { timestamp: f64 },
    BinaryFrame(Vec<u8>),
}

impl ChannelMessage {
    /// The metadata-then-binary pair for one encoded frame
    pub fn pair(timestamp: f64, bytes: Vec<u8>) -> [ChannelMessage; 2] {
        [
            ChannelMessage::Metadata { timestamp },
            ChannelMessage::BinaryFrame(bytes),
        ]
    }

    /// WebSocket frame: metadata as JSON text, image bytes as binary
    pub fn into_message(self) -> serde_json::Result<Message> {
        Ok(match self {
            ChannelMessage::Metadata { timestamp } => {
                Message::Text(serde_json::to_string(&FrameMeta { timestamp })?)
            }
            ChannelMessage::BinaryFrame(bytes) => Message::Binary(bytes),
        })
    }
}

/// Detection message received from the recognition service
///
/// Every field may be absent or null.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub plate: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Base64-encoded annotated JPEG
    #[serde(default)]
    pub frame: Option<String>,
    #[serde(default)]
    pub timestamp: Option<f64>,
}
