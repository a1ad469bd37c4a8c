//! Per-connection WebSocket handler
//!
//! Registers the connection as a session, forwards the session's outbound
//! queue to the socket and feeds inbound text frames to the coordinator. The
//! session is deregistered when either side closes.

use crate::Result;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use matchpoint_core::{Coordinator, Error as CoreError, ServerMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Time allowed for queued messages to flush after the session closes
const FLUSH_GRACE: Duration = Duration::from_secs(1);

/// Handle a single WebSocket connection
pub async fn handle_connection(stream: TcpStream, coordinator: Arc<Coordinator>) -> Result<()> {
    let addr = stream.peer_addr()?;
    debug!("New TCP connection from: {}", addr);

    let ws_stream = accept_async(stream).await?;
    let (ws_tx, mut ws_rx) = ws_stream.split();
    let ws_tx = Arc::new(Mutex::new(ws_tx));

    let capacity = coordinator.config().broadcast.session_queue_capacity;
    let (tx, rx) = mpsc::channel::<ServerMessage>(capacity);

    let session_id = match coordinator.connect(tx).await {
        Ok(session_id) => session_id,
        Err(e) => {
            warn!(peer = %addr, error = %e, "Connection rejected");
            reject(&ws_tx, &e).await;
            return Err(e.into());
        }
    };
    info!(peer = %addr, session_id = %session_id, "WebSocket session opened");

    let mut forward_task = tokio::spawn(forward(rx, Arc::clone(&ws_tx)));
    let mut forward_done = false;

    let reason = loop {
        tokio::select! {
            _ = &mut forward_task => {
                forward_done = true;
                break "server_closed";
            }
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    coordinator.handle_text(&session_id, &text).await;
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => coordinator.handle_text(&session_id, &text).await,
                    Err(_) => {
                        let err = CoreError::InvalidMessage("binary frame is not UTF-8 JSON".to_string());
                        coordinator.report_error(&session_id, &err).await;
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws_tx.lock().await.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(session_id = %session_id, "WebSocket closed by client");
                    break "client_closed";
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(session_id = %session_id, error = %e, "WebSocket error");
                    break "transport_error";
                }
            },
        }
    };

    coordinator.disconnect(&session_id, reason).await;

    // Deregistration closed the outbound queue; let the forwarder drain it
    if !forward_done && tokio::time::timeout(FLUSH_GRACE, &mut forward_task).await.is_err() {
        forward_task.abort();
    }

    info!(peer = %addr, session_id = %session_id, reason, "WebSocket session closed");
    Ok(())
}

/// Drain the session's outbound queue into the socket, then close it
async fn forward(mut rx: mpsc::Receiver<ServerMessage>, ws_tx: Arc<Mutex<WsSink>>) {
    while let Some(message) = rx.recv().await {
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode outbound message: {}", e);
                continue;
            }
        };
        if let Err(e) = ws_tx.lock().await.send(Message::Text(text)).await {
            debug!("Failed to send WebSocket message: {}", e);
            return;
        }
    }

    let close = CloseFrame {
        code: CloseCode::Normal,
        reason: "session closed".into(),
    };
    let _ = ws_tx.lock().await.send(Message::Close(Some(close))).await;
}

async fn reject(ws_tx: &Mutex<WsSink>, err: &CoreError) {
    let mut ws_tx = ws_tx.lock().await;
    if let Ok(text) = ServerMessage::error(err, None).to_json() {
        let _ = ws_tx.send(Message::Text(text)).await;
    }
    let close = CloseFrame {
        code: CloseCode::Again,
        reason: err.code().into(),
    };
    let _ = ws_tx.send(Message::Close(Some(close))).await;
}
