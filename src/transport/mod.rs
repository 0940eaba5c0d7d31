//! Transport capability consumed by the overlay core.
//!
//! The core never touches sockets. It talks to a [`Transport`]: one
//! logical connection that can emit events, emit events carrying a
//! single-shot reply channel, close, and signal when it has closed.
//!
//! The crate bundles one implementation, [`Channel`], which multiplexes
//! namespace connections over a physical [`Link`]. A link is driven by
//! whatever moves its [`Frame`]s: the axum WebSocket endpoint in
//! [`crate::ws`], the tokio-tungstenite client in [`crate::client`], or
//! an in-process [`memory::pair`].

pub mod frame;
pub mod link;
pub mod memory;

use std::fmt;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

pub use frame::{AckReply, Frame};
pub use link::{Channel, Link};

use crate::domain::Payload;
use crate::error::OverlayError;

/// Receiving half of a single-shot acknowledgement channel.
///
/// Resolves with the remote reply, or with a `RecvError` once the
/// connection closes before any reply arrived.
pub type AckReceiver = oneshot::Receiver<AckReply>;

/// One logical connection endpoint.
///
/// Implementations guarantee ordered, reliable, at-most-once delivery per
/// open connection. `emit` and `emit_with_ack` return once the frame has
/// been accepted for sending; they never wait for the remote side.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Sends a one-way event.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::TransportError`] if the connection is
    /// closed or cannot accept the frame.
    fn emit(&self, event: &str, payload: Payload) -> Result<(), OverlayError>;

    /// Sends an event bound to a fresh single-shot reply channel.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::TransportError`] if the connection is
    /// closed or cannot accept the frame.
    fn emit_with_ack(&self, event: &str, payload: Payload) -> Result<AckReceiver, OverlayError>;

    /// Closes the connection. Idempotent.
    fn close(&self);

    /// Returns `true` once the connection has closed, from either side.
    fn is_closed(&self) -> bool;

    /// Token cancelled when the connection closes.
    fn closed_signal(&self) -> CancellationToken;
}

/// Single-shot reply path handed to the receiver of an event sent with
/// [`Transport::emit_with_ack`]. Consumed by [`AckResponder::reply`].
pub struct AckResponder {
    send: Box<dyn FnOnce(AckReply) -> Result<(), OverlayError> + Send>,
}

impl AckResponder {
    /// Wraps the function that delivers the reply.
    pub fn new<F>(send: F) -> Self
    where
        F: FnOnce(AckReply) -> Result<(), OverlayError> + Send + 'static,
    {
        Self {
            send: Box::new(send),
        }
    }

    /// Creates a responder wired to a local oneshot channel.
    #[must_use]
    pub fn channel() -> (Self, AckReceiver) {
        let (tx, rx) = oneshot::channel();
        let responder = Self::new(move |reply| {
            tx.send(reply)
                .map_err(|_| OverlayError::TransportError("caller is gone".to_string()))
        });
        (responder, rx)
    }

    /// Sends the reply.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::TransportError`] if the reply cannot be
    /// delivered (connection closed or caller gone).
    pub fn reply(self, reply: AckReply) -> Result<(), OverlayError> {
        (self.send)(reply)
    }
}

impl fmt::Debug for AckResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckResponder").finish_non_exhaustive()
    }
}

/// An event received on a logical connection, ready for dispatch.
#[derive(Debug)]
pub struct InboundEvent {
    /// Event name.
    pub event: String,
    /// Opaque payload.
    pub payload: Payload,
    /// Reply path when the sender used [`Transport::emit_with_ack`].
    pub ack: Option<AckResponder>,
}
