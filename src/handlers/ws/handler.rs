//! Audio WebSocket handler
//!
//! Owns the transport side of one client connection: assigns the connection
//! identifier, decodes frames into inbound events for the relay engine, runs
//! the single outbound sender task that drains the session's buffer, and sends
//! the close notification when the socket ends.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Extension,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::{select, time::Duration};
use tracing::{debug, error, info, warn};

use crate::core::{ConnectionId, OutboundReceiver, RelayEngine};
use crate::errors::RelayError;
use crate::state::{AppState, ConnectionSlot};

use super::messages::{decode_binary_frame, decode_text_frame};

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// How often we check if the connection is stale
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// How long the sender may keep draining after the session closed
const SENDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Audio WebSocket handler
///
/// Upgrades the HTTP connection to a WebSocket relaying audio chunks to the
/// transcription provider and transcripts back to the client.
///
/// # Arguments
/// * `ws` - The WebSocket upgrade request from Axum
/// * `state` - Application state holding the relay engine
/// * `slot` - Connection slot reserved by the connection limit middleware
///
/// # Returns
/// * `Response` - HTTP response that upgrades the connection to WebSocket
pub async fn ws_audio_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    slot: Option<Extension<ConnectionSlot>>,
) -> Response {
    let slot = slot.map(|Extension(slot)| slot);
    debug!(?slot, "Audio WebSocket connection upgrade requested");

    // The slot moves into the upgrade callback; if the upgrade never
    // completes the callback is dropped and the slot with it.
    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_audio_socket(socket, state, slot))
}

/// Handle the audio WebSocket connection
async fn handle_audio_socket(
    socket: WebSocket,
    app_state: Arc<AppState>,
    slot: Option<ConnectionSlot>,
) {
    let client_ip = slot.as_ref().map(ConnectionSlot::ip);
    let connection_id = ConnectionId::generate();
    let relay = app_state.relay.clone();
    let (mut sender, mut receiver) = socket.split();

    let outbound = match relay.open(connection_id.clone()) {
        Ok(outbound) => outbound,
        Err(e) => {
            error!(%connection_id, "Failed to register session: {}", e);
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    info!(%connection_id, ?client_ip, "Audio WebSocket connection established");

    let mut sender_task = tokio::spawn(drain_outbound(outbound, sender, connection_id.clone()));

    // Maximum idle time before closing the connection
    let idle_timeout = Duration::from_secs(app_state.config.idle_timeout_seconds.max(1));
    let check_interval = IDLE_CHECK_INTERVAL.min(idle_timeout);
    let mut last_activity = Instant::now();

    loop {
        select! {
            msg_result = receiver.next() => {
                last_activity = Instant::now();

                match msg_result {
                    Some(Ok(msg)) => {
                        if !process_frame(msg, &connection_id, &relay) {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(%connection_id, "Audio WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!(%connection_id, "Audio WebSocket connection closed by client");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(check_interval) => {
                if last_activity.elapsed() > idle_timeout {
                    warn!(
                        %connection_id,
                        "Audio WebSocket connection idle for {}s, closing stale connection",
                        last_activity.elapsed().as_secs()
                    );
                    break;
                }
                debug!(%connection_id, "Audio WebSocket connection idle check - still active");
            }
        }
    }

    // Close notification: cancels in-flight provider calls and closes the
    // outbound buffer, which lets the sender task finish draining.
    let session = relay.registry().lookup(&connection_id);
    relay.close(&connection_id);

    if tokio::time::timeout(SENDER_DRAIN_TIMEOUT, &mut sender_task)
        .await
        .is_err()
    {
        sender_task.abort();
        let _ = (&mut sender_task).await;
        let dropped = session.as_ref().map(|s| s.buffered()).unwrap_or_default();
        warn!(
            %connection_id,
            dropped_outputs = dropped,
            "Outbound sender did not drain in time, aborting"
        );
    }

    // Releases the connection slot
    drop(slot);
    info!(%connection_id, "Audio WebSocket connection terminated");
}

/// Route one WebSocket frame to the relay engine.
///
/// Returns `false` when the client asked to close.
fn process_frame(msg: Message, connection_id: &ConnectionId, relay: &RelayEngine) -> bool {
    match msg {
        Message::Text(text) => {
            debug!(%connection_id, "Received text message: {} bytes", text.len());
            relay.handle_event(connection_id, decode_text_frame(text.as_str()));
            true
        }
        Message::Binary(data) => {
            debug!(%connection_id, "Received binary audio: {} bytes", data.len());
            relay.handle_event(connection_id, decode_binary_frame(data));
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            info!(%connection_id, "Audio WebSocket close received");
            false
        }
    }
}

/// Outbound sender: forwards buffered outputs in order, one text frame each,
/// until the buffer is closed or the client becomes unreachable.
async fn drain_outbound(
    mut outbound: OutboundReceiver,
    mut sender: SplitSink<WebSocket, Message>,
    connection_id: ConnectionId,
) {
    while let Some(output) = outbound.recv().await {
        if let Err(e) = sender.send(Message::Text(output.to_string().into())).await {
            let error = RelayError::TransportSend(e.to_string());
            warn!(%connection_id, "{}; stopping outbound sender", error);
            return;
        }
    }

    debug!(%connection_id, "Outbound buffer closed, closing socket");
    let _ = sender.send(Message::Close(None)).await;
}
