//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `ws` - Audio WebSocket relaying chunks to the transcription provider

pub mod api;
pub mod ws;

pub use ws::ws_audio_handler;
