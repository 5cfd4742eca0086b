use crate::infrastructure::error::{CliError, Result};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::{routing::get, Router};
use duel_session_p2p::infrastructure::{ClientFrame, ConnectionId, FrameSink, RelayHub, ServerFrame};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, instrument, warn};

/// Outgoing half of one client socket
#[derive(Clone)]
pub struct SocketSink(UnboundedSender<ServerFrame>);

impl FrameSink for SocketSink {
    fn deliver(&self, frame: ServerFrame) -> bool {
        self.0.send(frame).is_ok()
    }
}

/// Shared room table behind every socket
#[derive(Clone, Default)]
pub struct RelayState {
    hub: Arc<Mutex<RelayHub<SocketSink>>>,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    fn hub(&self) -> MutexGuard<'_, RelayHub<SocketSink>> {
        self.hub.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn room_count(&self) -> usize {
        self.hub().room_count()
    }
}

pub fn create_relay_route(state: RelayState) -> Router {
    debug!("Creating relay route");
    Router::new()
        .route("/ws", get(handle_websocket))
        .with_state(state)
}

/// Serve the relay until the process is interrupted
pub async fn serve(bind: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    let local = listener.local_addr()?;
    info!("🟢 Relay listening on ws://{}/ws", local);

    axum::serve(listener, create_relay_route(RelayState::new()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("🔴 Relay shutting down");
        })
        .await
        .map_err(|e| CliError::Connection(e.to_string()))
}

async fn handle_websocket(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| listen(socket, state))
}

#[instrument(skip(socket, state), fields(connection))]
async fn listen(socket: WebSocket, state: RelayState) {
    let connection = state.hub().next_connection_id();
    tracing::Span::current().record("connection", connection.0);
    debug!("🟢 Client connected");

    let (ws_sender, ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = SocketSink(tx);

    tokio::select! {
        _ = handle_outgoing_frames(rx, ws_sender) => {
            debug!("Sender task completed");
        }
        _ = handle_incoming_frames(ws_receiver, &state, connection, &sink) => {
            debug!("Receiver task completed");
        }
    }

    state.hub().disconnect(connection);
    debug!("🔴 Client disconnected");
}

async fn handle_outgoing_frames(
    mut rx: UnboundedReceiver<ServerFrame>,
    mut ws_sender: SplitSink<WebSocket, Message>,
) {
    while let Some(frame) = rx.recv().await {
        let text = match frame.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("❌ Could not encode frame: {}", e);
                continue;
            }
        };
        if let Err(e) = ws_sender.send(Message::Text(text)).await {
            debug!("Failed to send frame: {}", e);
            break;
        }
    }
}

async fn handle_incoming_frames(
    mut receiver: SplitStream<WebSocket>,
    state: &RelayState,
    connection: ConnectionId,
    sink: &SocketSink,
) {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match ClientFrame::from_json(&text) {
                Ok(frame) => {
                    debug!("📥 {} frame", frame.name());
                    state.hub().handle(connection, sink, frame);
                }
                Err(e) => warn!("❌ Dropping unreadable frame: {}", e),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Receive failed: {}", e);
                break;
            }
        }
    }
}
