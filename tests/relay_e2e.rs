//! End-to-end relay tests
//!
//! Spin up the real router on an ephemeral port and drive it with
//! tokio-tungstenite clients, checking the exact text frames each client
//! receives.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt, stream};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use transcribe_relay::{
    ProviderEvent, ProviderStream, ServerConfig, TranscriptionProvider, routes, state::AppState,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

fn test_config() -> ServerConfig {
    let mut config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    config.provider.simulated_interval_ms = 5;
    config
}

async fn spawn_server(state: Arc<AppState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = routes::create_app_router(state);
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/ws-audio"))
        .await
        .expect("websocket handshake failed");
    ws
}

async fn send_json(ws: &mut Client, json: &str) {
    ws.send(Message::Text(json.to_string().into())).await.unwrap();
}

/// Next text frame, skipping control frames
async fn next_text(ws: &mut Client) -> String {
    loop {
        let msg = timeout(FRAME_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return text.to_string(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(FRAME_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// `fail` chunks produce a provider error, anything else a single final
struct FlakyProvider;

impl TranscriptionProvider for FlakyProvider {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn stream_chunk(&self, chunk: Bytes) -> ProviderStream {
        let event = if chunk.as_ref() == b"fail" {
            ProviderEvent::Error {
                message: "timeout".to_string(),
            }
        } else {
            ProviderEvent::Final {
                text: String::from_utf8_lossy(&chunk).to_string(),
            }
        };
        Box::pin(stream::iter(vec![event]))
    }
}

#[tokio::test]
async fn test_audio_chunk_receives_simulated_transcript() {
    let state = AppState::new(test_config()).unwrap();
    let addr = spawn_server(state).await;
    let mut ws = connect(addr).await;

    send_json(&mut ws, r#"{"type":"audio","payload":"QUJD"}"#).await;

    assert_eq!(next_text(&mut ws).await, "partial: Hello");
    assert_eq!(next_text(&mut ws).await, "partial: Hello world");
    assert_eq!(next_text(&mut ws).await, "final: Hello world (simulated)");
}

#[tokio::test]
async fn test_unknown_message_gets_system_notice() {
    let state = AppState::new(test_config()).unwrap();
    let addr = spawn_server(state).await;
    let mut ws = connect(addr).await;

    send_json(&mut ws, r#"{"type":"banana"}"#).await;
    assert_eq!(next_text(&mut ws).await, "[system] unknown message type");

    send_json(&mut ws, "definitely not json").await;
    assert_eq!(next_text(&mut ws).await, "[system] unknown message type");
}

#[tokio::test]
async fn test_control_message_is_ignored() {
    let state = AppState::with_provider(test_config(), Arc::new(FlakyProvider));
    let addr = spawn_server(state).await;
    let mut ws = connect(addr).await;

    send_json(&mut ws, r#"{"type":"control","payload":{"action":"pause"}}"#).await;
    // base64("next")
    send_json(&mut ws, r#"{"type":"audio","payload":"bmV4dA=="}"#).await;

    // The first frame is the audio result, nothing was emitted for control
    assert_eq!(next_text(&mut ws).await, "final: next");
}

#[tokio::test]
async fn test_provider_error_then_recovery() {
    let state = AppState::with_provider(test_config(), Arc::new(FlakyProvider));
    let addr = spawn_server(state).await;
    let mut ws = connect(addr).await;

    // base64("fail")
    send_json(&mut ws, r#"{"type":"audio","payload":"ZmFpbA=="}"#).await;
    assert_eq!(next_text(&mut ws).await, "[error] timeout");

    // The session stays usable after a failed call
    // base64("again")
    send_json(&mut ws, r#"{"type":"audio","payload":"YWdhaW4="}"#).await;
    assert_eq!(next_text(&mut ws).await, "final: again");
}

#[tokio::test]
async fn test_binary_frame_is_relayed_as_audio() {
    let state = AppState::with_provider(test_config(), Arc::new(FlakyProvider));
    let addr = spawn_server(state).await;
    let mut ws = connect(addr).await;

    ws.send(Message::Binary(Bytes::from_static(b"raw-pcm")))
        .await
        .unwrap();
    assert_eq!(next_text(&mut ws).await, "final: raw-pcm");
}

#[tokio::test]
async fn test_session_removed_after_disconnect() {
    let state = AppState::new(test_config()).unwrap();
    let addr = spawn_server(state.clone()).await;
    let mut ws = connect(addr).await;

    wait_until(|| state.relay.registry().len() == 1).await;

    // Disconnect with a chunk still in flight
    send_json(&mut ws, r#"{"type":"audio","payload":"QUJD"}"#).await;
    ws.close(None).await.unwrap();
    drop(ws);

    wait_until(|| state.relay.registry().is_empty()).await;
    wait_until(|| state.ws_connection_count() == 0).await;
}

#[tokio::test]
async fn test_concurrent_connections_are_isolated() {
    let state = AppState::with_provider(test_config(), Arc::new(FlakyProvider));
    let addr = spawn_server(state.clone()).await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;

    wait_until(|| state.relay.registry().len() == 2).await;

    // base64("alice") / base64("bob")
    send_json(&mut alice, r#"{"type":"audio","payload":"YWxpY2U="}"#).await;
    send_json(&mut bob, r#"{"type":"audio","payload":"Ym9i"}"#).await;

    assert_eq!(next_text(&mut alice).await, "final: alice");
    assert_eq!(next_text(&mut bob).await, "final: bob");

    // Closing one client leaves the other session intact
    alice.close(None).await.unwrap();
    wait_until(|| state.relay.registry().len() == 1).await;

    send_json(&mut bob, r#"{"type":"banana"}"#).await;
    assert_eq!(next_text(&mut bob).await, "[system] unknown message type");
}

#[tokio::test]
async fn test_idle_connection_is_closed_and_cleaned_up() {
    let config = ServerConfig {
        idle_timeout_seconds: 1,
        ..test_config()
    };
    let state = AppState::new(config).unwrap();
    let addr = spawn_server(state.clone()).await;
    let mut ws = connect(addr).await;

    wait_until(|| state.relay.registry().len() == 1).await;

    // Send nothing and wait for the server to give up on us
    let closed = timeout(FRAME_TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) => break,
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                other => panic!("expected a close frame, got {other:?}"),
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "idle connection was not closed");

    wait_until(|| state.relay.registry().is_empty()).await;
    wait_until(|| state.ws_connection_count() == 0).await;
}
