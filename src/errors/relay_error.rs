//! Error taxonomy for the relay core.
//!
//! Only [`RelayError::DuplicateSession`] is ever returned to a caller. The
//! other variants describe recoverable failures that are mapped to client
//! notices or to stopping a single session's sender, and exist so those paths
//! log a consistent message.

use thiserror::Error;

use crate::core::ConnectionId;

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    /// A session is already registered under this identifier
    #[error("Session already registered: {0}")]
    DuplicateSession(ConnectionId),

    /// A provider call failed; surfaced to the client as `[error] ...`
    #[error("Provider call failed: {0}")]
    Provider(String),

    /// An inbound frame did not decode to a known message
    #[error("Failed to decode inbound message: {0}")]
    Decode(String),

    /// The client could not be reached; the session's sender stops
    #[error("Failed to send to client: {0}")]
    TransportSend(String),
}
