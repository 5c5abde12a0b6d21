//! WebSocket message decoding
//!
//! Inbound text frames are JSON objects tagged by `type`:
//!
//! ```json
//! { "type": "audio",   "payload": "<base64-encoded audio bytes>" }
//! { "type": "control", "payload": <any> }
//! ```
//!
//! Anything else (unknown tag, missing or invalid payload, non-JSON text)
//! decodes to [`InboundEvent::Unknown`] so the caller can answer with a notice
//! instead of failing the connection.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde_json::Value;
use tracing::debug;

use crate::core::InboundEvent;
use crate::errors::RelayError;

/// Maximum raw text retained on an `Unknown` event
const MAX_UNKNOWN_RAW_LEN: usize = 1024;

/// Decode a text frame into an inbound event. Never fails.
pub fn decode_text_frame(text: &str) -> InboundEvent {
    match try_decode(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "Unrecognised inbound frame");
            let mut raw = text.to_string();
            if raw.len() > MAX_UNKNOWN_RAW_LEN {
                let cut = (0..=MAX_UNKNOWN_RAW_LEN)
                    .rev()
                    .find(|i| raw.is_char_boundary(*i))
                    .unwrap_or(0);
                raw.truncate(cut);
            }
            InboundEvent::Unknown { raw }
        }
    }
}

/// Binary frames carry raw audio
pub fn decode_binary_frame(data: Bytes) -> InboundEvent {
    InboundEvent::AudioChunk { data }
}

fn try_decode(text: &str) -> Result<InboundEvent, RelayError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| RelayError::Decode(e.to_string()))?;
    let Value::Object(mut fields) = value else {
        return Err(RelayError::Decode("message is not a JSON object".to_string()));
    };

    let message_type = match fields.get("type") {
        Some(Value::String(t)) => t.clone(),
        Some(_) => return Err(RelayError::Decode("`type` must be a string".to_string())),
        None => return Err(RelayError::Decode("missing `type` field".to_string())),
    };

    match message_type.as_str() {
        "audio" => {
            let Some(Value::String(encoded)) = fields.remove("payload") else {
                return Err(RelayError::Decode(
                    "audio message requires a base64 string payload".to_string(),
                ));
            };
            let data = BASE64
                .decode(encoded.as_bytes())
                .map_err(|e| RelayError::Decode(format!("invalid base64 payload: {e}")))?;
            Ok(InboundEvent::AudioChunk {
                data: Bytes::from(data),
            })
        }
        "control" => Ok(InboundEvent::Control {
            payload: fields.remove("payload").unwrap_or(Value::Null),
        }),
        other => Err(RelayError::Decode(format!("unknown message type '{other}'"))),
    }
}
