//! WebSocket connection state machine.
//!
//! Bridges one socket to a server-side [`Link`]: text messages are decoded
//! into [`Frame`]s and routed through the [`OverlayServer`], and frames the
//! link queues are encoded and written back.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::service::OverlayServer;
use crate::transport::{Frame, Link};

/// Runs the read/write loop for a single WebSocket connection.
///
/// - Reads frames from the client and routes them to their channel.
/// - Writes frames queued on the link back to the client.
///
/// Returns once either side closes; the link is shut down on the way out,
/// which removes every peer it carried.
pub async fn run_connection(socket: WebSocket, server: Arc<OverlayServer>, outbound_buffer: usize) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel(outbound_buffer.max(1));
    let link = Link::new(out_tx);
    tracing::debug!("ws connection opened");

    loop {
        tokio::select! {
            // Incoming frame from client
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<Frame>(&text) {
                        Ok(frame) => server.handle_frame(&link, frame),
                        Err(err) => tracing::warn!(error = %err, "malformed frame dropped"),
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "ws read failed");
                        break;
                    }
                    _ => {}
                }
            }
            // Frame queued on the link
            frame = out_rx.recv() => {
                let Some(frame) = frame else {
                    break;
                };
                match serde_json::to_string(&frame) {
                    Ok(json) => {
                        if ws_tx.send(Message::text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "frame not encodable; dropped"),
                }
            }
        }
    }

    link.shutdown();
    let _ = ws_tx.close().await;
    tracing::debug!("ws connection closed");
}
