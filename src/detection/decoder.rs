use base64::Engine;
use tracing::{debug, warn};

use crate::channel::InboundMessage;

/// Normalized inbound recognition event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionEvent {
    /// Plate text; `None` means nothing was recognized this round
    pub plate: Option<String>,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Annotated JPEG bytes
    pub annotated_frame: Option<Vec<u8>>,
    /// Source-relative seconds echoed back from the frame metadata
    pub timestamp: Option<f64>,
}

impl DetectionEvent {
    /// Plate and confidence when this event is a candidate detection
    pub fn detection(&self) -> Option<(&str, f64)> {
        let plate = self.plate.as_deref()?.trim();
        if plate.is_empty() || !(self.confidence > 0.0) {
            return None;
        }
        Some((plate, self.confidence))
    }
}

/// Parse one inbound text message
///
/// Malformed payloads are logged and discarded. An undecodable `frame` field
/// only drops the image, the rest of the event is kept.
pub fn decode(text: &str) -> Option<DetectionEvent> {
    let message: InboundMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Discarding malformed inbound message: {}", e);
            return None;
        }
    };

    let annotated_frame = match message.frame.as_deref() {
        Some(encoded) if !encoded.is_empty() => {
            match base64::engine::general_purpose::STANDARD.decode(strip_data_url(encoded)) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!("Dropping undecodable annotated frame: {}", e);
                    None
                }
            }
        }
        _ => None,
    };

    let confidence = message
        .confidence
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(0.0);

    let timestamp = message.timestamp.filter(|t| t.is_finite());

    debug!(
        "Decoded event plate={:?} confidence={:.2} frame={} timestamp={:?}",
        message.plate,
        confidence,
        annotated_frame.is_some(),
        timestamp
    );

    Some(DetectionEvent {
        plate: message.plate,
        confidence,
        annotated_frame,
        timestamp,
    })
}

/// Accept `data:image/jpeg;base64,...` as well as bare base64
fn strip_data_url(encoded: &str) -> &str {
    match encoded.split_once(',') {
        Some((prefix, body)) if prefix.starts_with("data:") => body,
        _ => encoded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_message() {
        let frame = base64::engine::general_purpose::STANDARD.encode([0xFF, 0xD8, 0xFF, 0xD9]);
        let text = format!(
            r#"{{"plate":"ABC123","confidence":0.91,"frame":"{}","timestamp":12.5}}"#,
            frame
        );

        let event = decode(&text).unwrap();
        assert_eq!(event.plate.as_deref(), Some("ABC123"));
        assert_eq!(event.confidence, 0.91);
        assert_eq!(event.annotated_frame, Some(vec![0xFF, 0xD8, 0xFF, 0xD9]));
        assert_eq!(event.timestamp, Some(12.5));
        assert_eq!(event.detection(), Some(("ABC123", 0.91)));
    }

    #[test]
    fn test_decode_nulls_and_missing_fields() {
        let event = decode(r#"{"plate":null,"confidence":0.0,"frame":null,"timestamp":null}"#).unwrap();
        assert_eq!(event, DetectionEvent::default());
        assert!(event.detection().is_none());

        let event = decode("{}").unwrap();
        assert!(event.plate.is_none());
        assert!(event.detection().is_none());
    }

    #[test]
    fn test_malformed_message_is_discarded() {
        assert!(decode("not json").is_none());
        assert!(decode(r#"{"plate": 42}"#).is_none());
        assert!(decode("").is_none());
    }

    #[test]
    fn test_bad_frame_keeps_detection() {
        let event = decode(r#"{"plate":"XYZ999","confidence":0.8,"frame":"%%%not base64"}"#).unwrap();
        assert!(event.annotated_frame.is_none());
        assert_eq!(event.detection(), Some(("XYZ999", 0.8)));
    }

    #[test]
    fn test_data_url_frame() {
        let text = r#"{"frame":"data:image/jpeg;base64,/9j/"}"#;
        let event = decode(text).unwrap();
        assert_eq!(event.annotated_frame, Some(vec![0xFF, 0xD8, 0xFF]));
    }

    #[test]
    fn test_detection_requires_plate_and_confidence() {
        let blank = DetectionEvent {
            plate: Some("   ".to_string()),
            confidence: 0.9,
            ..Default::default()
        };
        assert!(blank.detection().is_none());

        let zero = DetectionEvent {
            plate: Some("ABC123".to_string()),
            confidence: 0.0,
            ..Default::default()
        };
        assert!(zero.detection().is_none());

        let padded = DetectionEvent {
            plate: Some(" ABC123 ".to_string()),
            confidence: 0.4,
            ..Default::default()
        };
        assert_eq!(padded.detection(), Some(("ABC123", 0.4)));
    }
}
