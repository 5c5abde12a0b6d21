//! Relay engine
//!
//! Composes the [`SessionRegistry`] with a [`TranscriptionProvider`]: inbound
//! events are turned into provider calls, and provider output is forwarded
//! into the owning session's outbound buffer.
//!
//! Every chunk call runs on its own task, so inbound processing never waits on
//! a provider. Events from one call keep their emission order; events from
//! concurrent calls interleave in arrival order.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tracing::{Instrument, debug, info_span, warn};

use super::provider::{ProviderEvent, ProviderStream, TranscriptionProvider};
use super::registry::SessionRegistry;
use super::session::{CallHandle, ConnectionId, OutboundReceiver, RelayOutput, Session};
use crate::errors::{RelayError, RelayResult};

/// Notice sent back for frames that do not decode to a known message
pub const UNKNOWN_MESSAGE_NOTICE: &str = "unknown message type";

/// Decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Raw audio bytes to transcribe
    AudioChunk { data: Bytes },
    /// Reserved for control messages
    Control { payload: serde_json::Value },
    /// Anything that failed to decode into a known message
    Unknown { raw: String },
}

#[derive(Clone)]
pub struct RelayEngine {
    registry: Arc<SessionRegistry>,
    provider: Arc<dyn TranscriptionProvider>,
}

impl RelayEngine {
    pub fn new(registry: Arc<SessionRegistry>, provider: Arc<dyn TranscriptionProvider>) -> Self {
        Self { registry, provider }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Register a session for a newly established connection and hand back
    /// the receiver its outbound sender drains.
    pub fn open(&self, id: ConnectionId) -> RelayResult<OutboundReceiver> {
        self.registry.register(id).map(|(_, outbound)| outbound)
    }

    /// Process one inbound event. Never fails: events for unknown or closed
    /// sessions are dropped silently.
    pub fn handle_event(&self, id: &ConnectionId, event: InboundEvent) {
        let Some(session) = self.registry.lookup(id) else {
            debug!(connection_id = %id, "Dropping event for unknown session");
            return;
        };
        if !session.is_open() {
            debug!(connection_id = %id, "Dropping event for closing session");
            return;
        }

        match event {
            InboundEvent::AudioChunk { data } => self.relay_chunk(session, data),
            InboundEvent::Control { payload } => {
                debug!(connection_id = %id, ?payload, "Ignoring control message");
            }
            InboundEvent::Unknown { raw } => {
                debug!(connection_id = %id, bytes = raw.len(), "Unknown inbound message");
                session.emit(RelayOutput::system_notice(UNKNOWN_MESSAGE_NOTICE));
            }
        }
    }

    /// Connection close notification. Cancels every in-flight call for the
    /// session and closes its buffer. Returns `false` if already closed.
    pub fn close(&self, id: &ConnectionId) -> bool {
        self.registry.unregister(id).is_some()
    }

    fn relay_chunk(&self, session: Arc<Session>, data: Bytes) {
        let Some(handle) = session.register_call() else {
            return;
        };

        let span = info_span!(
            "chunk_call",
            connection_id = %session.id(),
            chunk_seq = handle.id(),
            provider = self.provider.name(),
        );
        debug!(parent: &span, bytes = data.len(), "Relaying audio chunk");

        let stream = self.provider.stream_chunk(data);
        tokio::spawn(forward_provider_stream(session, handle, stream).instrument(span));
    }
}

/// Drive one provider call until it ends, fails or is cancelled, emitting
/// every event into the session.
async fn forward_provider_stream(
    session: Arc<Session>,
    handle: CallHandle,
    mut stream: ProviderStream,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = handle.cancelled() => {
                debug!("Provider call cancelled");
                break;
            }
            event = stream.next() => event,
        };

        match event {
            Some(ProviderEvent::Partial { text }) => {
                session.emit(RelayOutput::Partial { text });
            }
            Some(ProviderEvent::Final { text }) => {
                session.emit(RelayOutput::Final { text });
            }
            Some(ProviderEvent::Error { message }) => {
                warn!("{}", RelayError::Provider(message.clone()));
                session.emit(RelayOutput::ProviderError { message });
                break;
            }
            None => break,
        }
    }

    // Release provider resources before the handle is forgotten
    drop(stream);
    session.finish_call(handle.id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::provider::SimulatedProvider;
    use crate::core::session::SessionState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::time::timeout;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    fn engine_with(provider: impl TranscriptionProvider + 'static) -> RelayEngine {
        RelayEngine::new(Arc::new(SessionRegistry::new()), Arc::new(provider))
    }

    fn audio(bytes: &'static [u8]) -> InboundEvent {
        InboundEvent::AudioChunk {
            data: Bytes::from_static(bytes),
        }
    }

    async fn next_output(rx: &mut OutboundReceiver) -> RelayOutput {
        timeout(RECV_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for output")
            .expect("outbound buffer closed unexpectedly")
    }

    /// Emits `<chunk>-1`, `<chunk>-2` partials and a `<chunk>-final`, yielding
    /// between items so concurrent calls interleave.
    struct EchoProvider;

    impl TranscriptionProvider for EchoProvider {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn stream_chunk(&self, chunk: Bytes) -> ProviderStream {
            let tag = String::from_utf8_lossy(&chunk).to_string();
            Box::pin(async_stream::stream! {
                for step in 1..=2 {
                    tokio::task::yield_now().await;
                    yield ProviderEvent::Partial { text: format!("{tag}-{step}") };
                }
                tokio::task::yield_now().await;
                yield ProviderEvent::Final { text: format!("{tag}-final") };
            })
        }
    }

    /// Never completes; counts how many of its streams have been dropped.
    struct HangingProvider {
        dropped: Arc<AtomicUsize>,
    }

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl TranscriptionProvider for HangingProvider {
        fn name(&self) -> &'static str {
            "hanging"
        }

        fn stream_chunk(&self, _chunk: Bytes) -> ProviderStream {
            let guard = DropCounter(self.dropped.clone());
            Box::pin(async_stream::stream! {
                let _guard = guard;
                futures::future::pending::<()>().await;
                yield ProviderEvent::Final { text: "unreachable".to_string() };
            })
        }
    }

    /// Fails chunks whose payload is `fail`, echoes the rest.
    struct FlakyProvider;

    impl TranscriptionProvider for FlakyProvider {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn stream_chunk(&self, chunk: Bytes) -> ProviderStream {
            if chunk.as_ref() == b"fail" {
                Box::pin(futures::stream::iter(vec![ProviderEvent::Error {
                    message: "timeout".to_string(),
                }]))
            } else {
                Box::pin(futures::stream::iter(vec![ProviderEvent::Final {
                    text: "recovered".to_string(),
                }]))
            }
        }
    }

    #[tokio::test]
    async fn test_audio_chunk_relays_in_provider_order() {
        let engine = engine_with(SimulatedProvider::new(Duration::from_millis(1)));
        let id = ConnectionId::from("S1");
        let mut rx = engine.open(id.clone()).unwrap();

        engine.handle_event(&id, audio(b"ABC"));

        assert_eq!(
            next_output(&mut rx).await.to_string(),
            "partial: Hello"
        );
        assert_eq!(
            next_output(&mut rx).await.to_string(),
            "partial: Hello world"
        );
        assert_eq!(
            next_output(&mut rx).await.to_string(),
            "final: Hello world (simulated)"
        );
    }

    #[tokio::test]
    async fn test_concurrent_chunks_keep_per_chunk_order() {
        let engine = engine_with(EchoProvider);
        let id = ConnectionId::from("S1");
        let mut rx = engine.open(id.clone()).unwrap();

        let chunks: [&'static [u8]; 3] = [b"a", b"b", b"c"];
        for chunk in chunks {
            engine.handle_event(&id, audio(chunk));
        }

        let mut outputs = Vec::new();
        for _ in 0..9 {
            outputs.push(next_output(&mut rx).await.to_string());
        }

        for tag in ["a", "b", "c"] {
            let for_chunk: Vec<_> = outputs
                .iter()
                .filter(|o| o.contains(&format!(" {tag}-")))
                .cloned()
                .collect();
            assert_eq!(
                for_chunk,
                vec![
                    format!("partial: {tag}-1"),
                    format!("partial: {tag}-2"),
                    format!("final: {tag}-final"),
                ]
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_event_emits_single_notice() {
        let engine = engine_with(EchoProvider);
        let id = ConnectionId::from("S1");
        let mut rx = engine.open(id.clone()).unwrap();

        engine.handle_event(
            &id,
            InboundEvent::Unknown {
                raw: r#"{"type":"banana"}"#.to_string(),
            },
        );

        assert_eq!(
            next_output(&mut rx).await,
            RelayOutput::system_notice(UNKNOWN_MESSAGE_NOTICE)
        );
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        let session = engine.registry().lookup(&id).expect("connection stays open");
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn test_control_event_is_noop() {
        let engine = engine_with(EchoProvider);
        let id = ConnectionId::from("S1");
        let mut rx = engine.open(id.clone()).unwrap();

        engine.handle_event(
            &id,
            InboundEvent::Control {
                payload: serde_json::json!({"action": "something-new"}),
            },
        );
        tokio::task::yield_now().await;

        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert!(engine.registry().lookup(&id).unwrap().is_open());
    }

    #[tokio::test]
    async fn test_provider_error_does_not_close_session() {
        let engine = engine_with(FlakyProvider);
        let id = ConnectionId::from("S1");
        let mut rx = engine.open(id.clone()).unwrap();

        engine.handle_event(&id, audio(b"fail"));
        assert_eq!(
            next_output(&mut rx).await.to_string(),
            "[error] timeout"
        );

        engine.handle_event(&id, audio(b"ok"));
        assert_eq!(
            next_output(&mut rx).await.to_string(),
            "final: recovered"
        );
        assert!(engine.registry().lookup(&id).unwrap().is_open());
    }

    #[tokio::test]
    async fn test_audio_after_close_is_dropped() {
        let engine = engine_with(EchoProvider);
        let id = ConnectionId::from("S1");
        let mut rx = engine.open(id.clone()).unwrap();

        assert!(engine.close(&id));
        engine.handle_event(&id, audio(b"late"));

        assert_eq!(timeout(RECV_TIMEOUT, rx.recv()).await.unwrap(), None);
        assert!(engine.registry().lookup(&id).is_none());
    }

    #[tokio::test]
    async fn test_event_for_unregistered_id_is_dropped() {
        let engine = engine_with(EchoProvider);
        engine.handle_event(&ConnectionId::from("ghost"), audio(b"ABC"));
        engine.handle_event(
            &ConnectionId::from("ghost"),
            InboundEvent::Unknown { raw: String::new() },
        );
        assert!(engine.registry().is_empty());
    }

    #[tokio::test]
    async fn test_close_cancels_all_in_flight_calls() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let engine = engine_with(HangingProvider {
            dropped: dropped.clone(),
        });
        let id = ConnectionId::from("S1");
        let mut rx = engine.open(id.clone()).unwrap();

        const CALLS: usize = 4;
        for _ in 0..CALLS {
            engine.handle_event(&id, audio(b"ABC"));
        }
        let session = engine.registry().lookup(&id).unwrap();
        assert_eq!(session.active_calls(), CALLS);

        assert!(engine.close(&id));
        assert!(!engine.close(&id));
        assert_eq!(session.state(), SessionState::Closed);

        timeout(RECV_TIMEOUT, async {
            while dropped.load(Ordering::SeqCst) < CALLS {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("all provider calls should be cancelled");

        assert_eq!(session.active_calls(), 0);
        assert_eq!(timeout(RECV_TIMEOUT, rx.recv()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_finished_calls_are_released() {
        let engine = engine_with(FlakyProvider);
        let id = ConnectionId::from("S1");
        let mut rx = engine.open(id.clone()).unwrap();

        engine.handle_event(&id, audio(b"ok"));
        next_output(&mut rx).await;

        let session = engine.registry().lookup(&id).unwrap();
        timeout(RECV_TIMEOUT, async {
            while session.active_calls() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("completed call should be released");
    }
}
