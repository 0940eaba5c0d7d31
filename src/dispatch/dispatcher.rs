//! Per-connection event demultiplexer.
//!
//! [`EventDispatcher`] maps event names to an ordered list of handlers.
//! Dispatch works on a snapshot of that list taken before the first
//! handler runs, so handlers may register handlers, emit, broadcast or
//! call without deadlocking on the table or disturbing the iteration.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;

use super::Handler;
use crate::call;
use crate::domain::Payload;
use crate::error::OverlayError;
use crate::transport::AckResponder;

/// Ordered handler table for one peer.
#[derive(Debug, Default)]
pub struct EventDispatcher {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl EventDispatcher {
    /// Creates an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to the handlers of `event`.
    pub fn register(&self, event: impl Into<String>, handler: Handler) {
        self.handlers
            .write()
            .entry(event.into())
            .or_default()
            .push(handler);
    }

    /// Drops every handler. Called when the peer disconnects.
    pub fn unregister_all(&self) {
        self.handlers.write().clear();
    }

    /// Number of handlers registered for `event`.
    #[must_use]
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.read().get(event).map_or(0, Vec::len)
    }

    /// Returns `true` if any call-style handler is registered for `event`.
    #[must_use]
    pub fn is_call_event(&self, event: &str) -> bool {
        self.handlers
            .read()
            .get(event)
            .is_some_and(|handlers| handlers.iter().any(Handler::is_call))
    }

    /// Invokes every handler of `event` in registration order and returns
    /// how many ran.
    ///
    /// A failing or panicking handler is logged and the remaining handlers
    /// still run. When `ack` is present, the result of the first call-style
    /// handler is sent back over it; results of later call handlers are
    /// discarded. If no call-style handler exists the reply path is dropped
    /// unanswered, so the caller observes a timeout.
    pub async fn dispatch(&self, event: &str, payload: Payload, mut ack: Option<AckResponder>) -> usize {
        let snapshot: Vec<Handler> = self
            .handlers
            .read()
            .get(event)
            .cloned()
            .unwrap_or_default();
        if snapshot.is_empty() {
            tracing::trace!(event, "no handlers registered; event dropped");
            return 0;
        }

        for (position, handler) in snapshot.iter().enumerate() {
            match handler {
                Handler::Event(run) => {
                    let outcome = run_isolated(|| run(payload.clone())).await;
                    if let Err(err) = outcome {
                        tracing::warn!(event, position, error = %err, "event handler failed");
                    }
                }
                Handler::Call(run) => {
                    let outcome = run_isolated(|| run(payload.clone())).await;
                    match ack.take() {
                        Some(responder) => call::acknowledge(responder, event, outcome),
                        None => {
                            if let Err(err) = outcome {
                                tracing::warn!(event, position, error = %err, "call handler failed");
                            }
                        }
                    }
                }
            }
        }
        snapshot.len()
    }
}

/// Runs one handler, turning a panic into a handler failure.
async fn run_isolated<T, F>(start: F) -> Result<T, OverlayError>
where
    F: FnOnce() -> BoxFuture<'static, Result<T, OverlayError>>,
{
    let Ok(future) = std::panic::catch_unwind(AssertUnwindSafe(start)) else {
        return Err(OverlayError::handler("handler panicked"));
    };
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(OverlayError::handler("handler panicked")))
}
