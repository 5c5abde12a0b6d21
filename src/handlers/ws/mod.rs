//! Audio WebSocket handlers
//!
//! # Protocol
//!
//! ## Client → Server
//!
//! - `{"type": "audio", "payload": "<base64>"}`: audio chunk to transcribe
//! - `{"type": "control", "payload": <any>}`: reserved, currently ignored
//! - **Binary frames**: raw audio chunk
//!
//! ## Server → Client
//!
//! One text frame per result:
//!
//! - `partial: <text>`
//! - `final: <text>`
//! - `[error] <message>`
//! - `[system] <text>`

mod handler;
pub mod messages;

pub use handler::ws_audio_handler;
