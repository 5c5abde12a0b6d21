//! Session registry
//!
//! Maps connection identifiers to live [`Session`]s. Owned by the application
//! state and shared by reference; there is no process-global table.
//!
//! [`SessionRegistry::unregister`] is the only code path that tears a session
//! down (cancels its provider calls and closes its outbound buffer), so a
//! session can never be closed twice.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};

use super::session::{ConnectionId, DEFAULT_OUTBOUND_WARN_DEPTH, OutboundReceiver, Session};
use crate::errors::{RelayError, RelayResult};

/// Thread-safe table of open sessions.
/// Uses DashMap so different connections never contend on one lock.
pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, Arc<Session>>,
    outbound_warn_depth: usize,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_outbound_warn_depth(DEFAULT_OUTBOUND_WARN_DEPTH)
    }

    /// Registry whose sessions warn once their outbound buffer holds
    /// `depth` undelivered outputs
    pub fn with_outbound_warn_depth(depth: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            outbound_warn_depth: depth,
        }
    }

    /// Create and store a session for `id`.
    ///
    /// Fails with [`RelayError::DuplicateSession`] if `id` is already present;
    /// the existing session is left untouched.
    pub fn register(&self, id: ConnectionId) -> RelayResult<(Arc<Session>, OutboundReceiver)> {
        match self.sessions.entry(id) {
            Entry::Occupied(entry) => {
                let id = entry.key().clone();
                warn!(connection_id = %id, "Rejecting duplicate session registration");
                Err(RelayError::DuplicateSession(id))
            }
            Entry::Vacant(entry) => {
                let (session, outbound) =
                    Session::new(entry.key().clone(), self.outbound_warn_depth);
                entry.insert(session.clone());
                debug!(connection_id = %session.id(), "Session registered");
                Ok((session, outbound))
            }
        }
    }

    pub fn lookup(&self, id: &ConnectionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Remove the session and tear it down: every active provider call is
    /// cancelled and the outbound buffer is closed.
    ///
    /// Idempotent: returns `None` if `id` is unknown or already removed.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(id)?;

        let cancelled = session.cancel_calls();
        session.close_buffer();

        debug!(
            connection_id = %id,
            cancelled_calls = cancelled,
            "Session unregistered"
        );
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Identifiers of all open sessions
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
