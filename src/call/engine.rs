//! Request/response over one-way events.
//!
//! [`call`] emits an event bound to a single-shot acknowledgement channel
//! and waits for whichever comes first: the acknowledgement, the deadline,
//! or the peer being torn down. [`register_call_handler`] and
//! [`acknowledge`] are the responding half.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::call_table::Registration;
use super::pending_call::{CallOutcome, PendingCall};
use crate::dispatch::{EventDispatcher, Handler};
use crate::domain::{Payload, Peer};
use crate::error::OverlayError;
use crate::transport::{AckReply, AckResponder};

const CLOSED_BEFORE_ACK: &str = "connection closed before acknowledgement";

/// Sends `event` to `target` and waits for its acknowledgement.
///
/// The deadline starts once the transport has accepted the frame, so slow
/// serialization does not eat into `timeout`.
///
/// # Errors
///
/// - [`OverlayError::Timeout`] if no acknowledgement arrives in time.
/// - [`OverlayError::TransportError`] if the frame cannot be sent or the
///   connection closes before acknowledgement.
/// - [`OverlayError::HandlerError`] if the remote handler failed.
pub async fn call(
    target: &Peer,
    event: &str,
    payload: Payload,
    timeout: Duration,
) -> Result<Payload, OverlayError> {
    let mut ack_rx = target.transport().emit_with_ack(event, payload.clone())?;
    let (pending, mut resolved_elsewhere) = PendingCall::new(event, payload, timeout);
    let pending = Arc::new(pending);
    let _registration = Registration::new(target.calls(), &pending);

    // A disconnect between the emit and the registration above would
    // otherwise be missed by the peer's teardown.
    if target.transport().is_closed() {
        pending.resolve(CallOutcome::TransportFailed(CLOSED_BEFORE_ACK.to_string()));
    }

    tokio::select! {
        reply = &mut ack_rx => {
            let outcome = match reply {
                Ok(AckReply::Ok(value)) => CallOutcome::Succeeded(value),
                Ok(AckReply::Error(marker)) => CallOutcome::HandlerFailed(marker),
                Err(_) => CallOutcome::TransportFailed(CLOSED_BEFORE_ACK.to_string()),
            };
            if !pending.resolve(outcome) {
                tracing::debug!(event, peer_id = %target.id(), "acknowledgement arrived after resolution; ignored");
            }
        }
        () = tokio::time::sleep_until(pending.deadline()) => {
            if !pending.resolve(CallOutcome::TimedOut) {
                tracing::debug!(event, peer_id = %target.id(), "deadline fired after resolution; ignored");
            }
        }
        _ = &mut resolved_elsewhere => {}
    }

    let result = pending.result();
    if let Err(err) = &result {
        tracing::debug!(event, peer_id = %target.id(), error = %err, "call failed");
    }
    result
}

/// Registers `handler` as the call-style handler of `event`.
///
/// When a frame for `event` arrives with an acknowledgement channel, the
/// handler's result is sent back over it. Without one the handler still
/// runs and its result is discarded.
pub fn register_call_handler<F, Fut>(dispatcher: &EventDispatcher, event: impl Into<String>, handler: F)
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Payload, OverlayError>> + Send + 'static,
{
    dispatcher.register(event, Handler::call(handler));
}

/// Sends a call handler's result back over its acknowledgement channel.
///
/// An `Err` travels as an error marker: the payload of a
/// [`OverlayError::HandlerError`] verbatim, any other error as its message.
pub fn acknowledge(responder: AckResponder, event: &str, outcome: Result<Payload, OverlayError>) {
    let reply = match outcome {
        Ok(value) => AckReply::Ok(value),
        Err(err) => {
            tracing::debug!(event, error = %err, "call handler failed; acknowledging with error");
            AckReply::Error(err.ack_marker())
        }
    };
    if let Err(err) = responder.reply(reply) {
        tracing::debug!(event, error = %err, "acknowledgement not delivered");
    }
}
