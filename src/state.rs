//! Shared application state
//!
//! Holds the loaded configuration, the relay engine (which owns the session
//! registry) and WebSocket connection accounting used by the connection limit
//! middleware.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use tracing::info;

use crate::config::ServerConfig;
use crate::core::provider::{ProviderError, TranscriptionProvider, create_provider};
use crate::core::{RelayEngine, SessionRegistry};

/// Reasons a new WebSocket connection is refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

/// A reserved WebSocket connection slot.
///
/// The slot is returned to [`AppState`] when the last clone is dropped, so a
/// refused or failed upgrade releases it as reliably as a closed socket.
#[derive(Clone)]
pub struct ConnectionSlot(Arc<SlotGuard>);

struct SlotGuard {
    state: Arc<AppState>,
    ip: IpAddr,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.state.release_connection(self.ip);
    }
}

impl ConnectionSlot {
    /// Reserve a slot for `ip`, or report which limit was hit
    pub fn acquire(state: &Arc<AppState>, ip: IpAddr) -> Result<Self, ConnectionLimitError> {
        state.try_acquire_connection(ip)?;
        Ok(Self(Arc::new(SlotGuard {
            state: state.clone(),
            ip,
        })))
    }

    pub fn ip(&self) -> IpAddr {
        self.0.ip
    }
}

impl fmt::Debug for ConnectionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionSlot").field(&self.0.ip).finish()
    }
}

pub struct AppState {
    pub config: ServerConfig,
    pub relay: RelayEngine,
    ws_connections: AtomicUsize,
    connections_per_ip: DashMap<IpAddr, u32>,
}

impl AppState {
    /// Build state with the provider selected by `config.provider`
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, ProviderError> {
        let provider = create_provider(&config.provider)?;
        info!(provider = provider.name(), "Transcription provider ready");
        Ok(Self::with_provider(config, provider))
    }

    /// Build state around an already constructed provider
    pub fn with_provider(
        config: ServerConfig,
        provider: Arc<dyn TranscriptionProvider>,
    ) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::with_outbound_warn_depth(
            config.outbound_warn_depth,
        ));
        Arc::new(Self {
            relay: RelayEngine::new(registry, provider),
            config,
            ws_connections: AtomicUsize::new(0),
            connections_per_ip: DashMap::new(),
        })
    }

    /// Reserve a WebSocket connection slot for `ip`
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        let max = self.config.max_websocket_connections;
        self.ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| match max {
                Some(max) if current >= max => None,
                _ => Some(current + 1),
            })
            .map_err(|_| ConnectionLimitError::GlobalLimitReached)?;

        let mut per_ip = self.connections_per_ip.entry(ip).or_insert(0);
        if *per_ip >= self.config.max_connections_per_ip {
            drop(per_ip);
            self.release_global_slot();
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *per_ip += 1;
        Ok(())
    }

    /// Return a slot obtained from [`AppState::try_acquire_connection`]
    pub fn release_connection(&self, ip: IpAddr) {
        self.release_global_slot();
        if let Some(mut count) = self.connections_per_ip.get_mut(&ip) {
            *count = count.saturating_sub(1);
        }
        self.connections_per_ip.remove_if(&ip, |_, count| *count == 0);
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.connections_per_ip.get(ip).map(|c| *c).unwrap_or(0)
    }

    fn release_global_slot(&self) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                Some(c.saturating_sub(1))
            });
    }
}
