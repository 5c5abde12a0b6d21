pub mod provider;
pub mod registry;
pub mod relay;
pub mod session;

// Re-export commonly used types for convenience
pub use provider::{
    ProviderError, ProviderEvent, ProviderKind, ProviderSettings, ProviderStream,
    TranscriptionProvider, create_provider, get_supported_providers,
};
pub use registry::SessionRegistry;
pub use relay::{InboundEvent, RelayEngine, UNKNOWN_MESSAGE_NOTICE};
pub use session::{
    CallHandle, ConnectionId, DEFAULT_OUTBOUND_WARN_DEPTH, OutboundReceiver, RelayOutput, Session,
    SessionState,
};
