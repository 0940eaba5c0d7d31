//! Client-side connection lifecycle.
//!
//! [`connect`] dials the server's WebSocket endpoint and returns the
//! [`Peer`] of the default namespace. [`join_namespace`] opens another
//! logical connection over the same socket, and [`disconnect`] closes one;
//! the socket itself goes away with the last logical connection.
//!
//! [`attach`] does the same over an in-process [`MemoryEnd`].
//!
//! Every entry point takes a `setup` callback, the client counterpart of
//! the server's connect subscribers. It runs on the new [`Peer`] before any
//! inbound event is dispatched, so handlers registered there also see what
//! the server sends while accepting the connection.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::domain::{DEFAULT_NAMESPACE, Peer, normalize_namespace};
use crate::error::OverlayError;
use crate::transport::memory::MemoryEnd;
use crate::transport::{Frame, Link, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client connection options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    connect_timeout: Duration,
    outbound_buffer: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            outbound_buffer: 1024,
        }
    }
}

impl ClientOptions {
    /// Creates options with the defaults (5s handshake, 1024 frames).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds the socket dial and each namespace handshake.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the outbound frame queue capacity.
    #[must_use]
    pub fn with_outbound_buffer(mut self, capacity: usize) -> Self {
        self.outbound_buffer = capacity.max(1);
        self
    }

    /// Handshake timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Outbound frame queue capacity.
    #[must_use]
    pub fn outbound_buffer(&self) -> usize {
        self.outbound_buffer
    }
}

/// Connects to `endpoint` (a `ws://` URL) with default options and joins
/// the default namespace, running `setup` before events are dispatched.
///
/// # Errors
///
/// See [`connect_with`].
pub async fn connect<F>(endpoint: &str, setup: F) -> Result<Peer, OverlayError>
where
    F: FnOnce(&Peer) + Send,
{
    connect_with(endpoint, &ClientOptions::default(), setup).await
}

/// Connects to `endpoint` and joins the default namespace.
///
/// # Errors
///
/// - [`OverlayError::TransportError`] if the socket cannot be opened or
///   closes during the handshake.
/// - [`OverlayError::Timeout`] if the server does not answer in time.
pub async fn connect_with<F>(
    endpoint: &str,
    options: &ClientOptions,
    setup: F,
) -> Result<Peer, OverlayError>
where
    F: FnOnce(&Peer) + Send,
{
    let dial = tokio::time::timeout(options.connect_timeout, connect_async(endpoint)).await;
    let ws = match dial {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(err)) => {
            return Err(OverlayError::TransportError(format!(
                "connect {endpoint}: {err}"
            )));
        }
        Err(_) => return Err(handshake_timeout(options.connect_timeout)),
    };

    let (out_tx, out_rx) = mpsc::channel(options.outbound_buffer);
    let link = Link::client(out_tx);
    tokio::spawn(drive_socket(ws, link.clone(), out_rx));
    tracing::debug!(endpoint, "socket connected");

    open(&link, DEFAULT_NAMESPACE, options.connect_timeout, setup).await
}

/// Joins the default namespace over an in-process link end.
///
/// # Errors
///
/// See [`connect_with`].
pub async fn attach<F>(end: MemoryEnd, options: &ClientOptions, setup: F) -> Result<Peer, OverlayError>
where
    F: FnOnce(&Peer) + Send,
{
    let MemoryEnd { link, inbound } = end;
    tokio::spawn(drive_frames(link.clone(), inbound));
    open(&link, DEFAULT_NAMESPACE, options.connect_timeout, setup).await
}

/// Opens a logical connection to `namespace` over the physical link of
/// `peer`, using the default handshake timeout.
///
/// # Errors
///
/// See [`join_namespace_with`].
pub async fn join_namespace<F>(peer: &Peer, namespace: &str, setup: F) -> Result<Peer, OverlayError>
where
    F: FnOnce(&Peer) + Send,
{
    join_namespace_with(peer, namespace, &ClientOptions::default(), setup).await
}

/// Opens a logical connection to `namespace` over the physical link of
/// `peer`. The returned peer is independent: disconnecting either one
/// leaves the other open.
///
/// # Errors
///
/// - [`OverlayError::InvalidRequest`] if `peer` is not carried by a link.
/// - [`OverlayError::TransportError`] if the link is closed, the server
///   refuses the namespace, or a handshake for it is already in progress.
/// - [`OverlayError::Timeout`] if the server does not answer in time.
pub async fn join_namespace_with<F>(
    peer: &Peer,
    namespace: &str,
    options: &ClientOptions,
    setup: F,
) -> Result<Peer, OverlayError>
where
    F: FnOnce(&Peer) + Send,
{
    let Some(link) = peer.link() else {
        return Err(OverlayError::InvalidRequest(
            "peer is not multiplexed over a link".to_string(),
        ));
    };
    open(link, &normalize_namespace(namespace), options.connect_timeout, setup).await
}

/// Closes the logical connection of `peer`.
pub fn disconnect(peer: &Peer) {
    peer.disconnect();
}

async fn open<F>(
    link: &Link,
    namespace: &str,
    timeout: Duration,
    setup: F,
) -> Result<Peer, OverlayError>
where
    F: FnOnce(&Peer) + Send,
{
    let connected = link.expect_connected(namespace)?;
    let (channel, inbound) = link.open_channel(namespace);
    let refused = channel.closed_signal();

    if let Err(err) = link.send(Frame::Connect {
        namespace: namespace.to_string(),
    }) {
        channel.close();
        return Err(err);
    }

    let outcome = tokio::select! {
        id = connected => id.map_err(|_| OverlayError::TransportError(
            "link closed during handshake".to_string(),
        )),
        () = refused.cancelled() => Err(OverlayError::TransportError(format!(
            "server refused namespace {namespace}"
        ))),
        () = tokio::time::sleep(timeout) => Err(handshake_timeout(timeout)),
    };
    let peer_id = match outcome {
        Ok(id) => id,
        Err(err) => {
            channel.close();
            return Err(err);
        }
    };

    // Events the server sent while accepting are queued in `inbound`; they
    // are dispatched only once `setup` has registered its handlers.
    let peer = Peer::from_channel(peer_id, channel);
    setup(&peer);
    let pumping = peer.clone();
    tokio::spawn(async move {
        pumping.pump(inbound).await;
        pumping.shut_down();
    });
    tracing::debug!(peer_id = %peer_id, namespace, "namespace joined");
    Ok(peer)
}

fn handshake_timeout(timeout: Duration) -> OverlayError {
    OverlayError::Timeout {
        event: "connect".to_string(),
        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
}

fn route(link: &Link, frame: Frame) {
    if let Some(namespace) = link.deliver(frame) {
        tracing::debug!(namespace, "connect request sent to a client; ignored");
    }
}

async fn drive_frames(link: Link, mut inbound: mpsc::Receiver<Frame>) {
    let closed = link.closed_signal();
    loop {
        tokio::select! {
            biased;
            () = closed.cancelled() => break,
            frame = inbound.recv() => match frame {
                Some(frame) => route(&link, frame),
                None => break,
            },
        }
    }
    link.shutdown();
}

/// Client socket loop: writes frames queued on the link and routes frames
/// read from the server. Ends when either the socket or the link closes.
async fn drive_socket(ws: WsStream, link: Link, mut out_rx: mpsc::Receiver<Frame>) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            frame = out_rx.recv() => {
                let Some(frame) = frame else { break };
                match serde_json::to_string(&frame) {
                    Ok(json) => {
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "frame not encodable; dropped"),
                }
            }
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => match serde_json::from_str::<Frame>(&text) {
                        Ok(frame) => route(&link, frame),
                        Err(err) => tracing::warn!(error = %err, "malformed frame dropped"),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    link.shutdown();
    let _ = ws_tx.close().await;
    tracing::debug!("socket closed");
}
