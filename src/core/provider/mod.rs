//! Streaming transcription providers.
//!
//! A provider turns one audio chunk into a lazy, finite, ordered stream of
//! [`ProviderEvent`]s. Dropping the stream cancels the call and releases its
//! resources; the relay never blocks its inbound path waiting on it.
//!
//! # Supported Providers
//!
//! - **simulated** - Scripted partials/final on a fixed interval
//! - **http** - Streaming HTTP endpoint returning newline-delimited JSON

pub mod http;
pub mod simulated;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

pub use http::HttpStreamingProvider;
pub use simulated::{DEFAULT_SIMULATED_INTERVAL_MS, SimulatedProvider};

/// Errors raised while configuring or talking to a provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Invalid or incomplete provider configuration
    #[error("Invalid provider configuration: {0}")]
    InvalidConfiguration(String),

    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Provider answered with a non-success status
    #[error("Provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Provider response could not be decoded
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    /// Call exceeded the configured timeout (milliseconds)
    #[error("Request timed out after {0}ms")]
    Timeout(u64),
}

/// One item produced by a provider call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderEvent {
    Partial { text: String },
    Final { text: String },
    /// Terminal failure of this call
    Error { message: String },
}

impl From<ProviderError> for ProviderEvent {
    fn from(error: ProviderError) -> Self {
        ProviderEvent::Error {
            message: error.to_string(),
        }
    }
}

/// Lazy event stream for one chunk call
pub type ProviderStream = BoxStream<'static, ProviderEvent>;

/// Streaming speech-to-text client consumed by the relay engine.
pub trait TranscriptionProvider: Send + Sync {
    /// Short provider name used in logs
    fn name(&self) -> &'static str;

    /// Start a call for one audio chunk.
    ///
    /// Must return immediately; all work happens when the stream is polled.
    fn stream_chunk(&self, chunk: Bytes) -> ProviderStream;
}

/// Supported provider kinds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    #[default]
    Simulated,
    Http,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Simulated => write!(f, "simulated"),
            ProviderKind::Http => write!(f, "http"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "simulated" => Ok(ProviderKind::Simulated),
            "http" => Ok(ProviderKind::Http),
            other => Err(ProviderError::InvalidConfiguration(format!(
                "Unsupported provider: {other}. Supported: {:?}",
                get_supported_providers()
            ))),
        }
    }
}

/// Provider selection and connection settings
#[derive(Clone)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    /// Streaming endpoint (required for `http`)
    pub endpoint: Option<String>,
    /// Bearer token sent to the endpoint, wiped from memory on drop
    pub api_key: Option<Zeroizing<String>>,
    /// Per-call timeout applied by the provider client
    pub timeout_ms: Option<u64>,
    /// Delay between scripted events of the simulated provider
    pub simulated_interval_ms: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Simulated,
            endpoint: None,
            api_key: None,
            timeout_ms: None,
            simulated_interval_ms: DEFAULT_SIMULATED_INTERVAL_MS,
        }
    }
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_ms", &self.timeout_ms)
            .field("simulated_interval_ms", &self.simulated_interval_ms)
            .finish()
    }
}

pub fn get_supported_providers() -> Vec<&'static str> {
    vec!["simulated", "http"]
}

/// Build the configured provider
pub fn create_provider(
    settings: &ProviderSettings,
) -> Result<Arc<dyn TranscriptionProvider>, ProviderError> {
    match settings.kind {
        ProviderKind::Simulated => Ok(Arc::new(SimulatedProvider::new(
            std::time::Duration::from_millis(settings.simulated_interval_ms),
        ))),
        ProviderKind::Http => Ok(Arc::new(HttpStreamingProvider::new(settings)?)),
    }
}
