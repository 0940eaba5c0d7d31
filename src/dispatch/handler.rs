//! Handler types stored by the [`super::EventDispatcher`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::domain::Payload;
use crate::error::OverlayError;

/// Boxed one-way event handler.
pub type EventFn = dyn Fn(Payload) -> BoxFuture<'static, Result<(), OverlayError>> + Send + Sync;

/// Boxed call handler; its value becomes the acknowledgement payload.
pub type CallFn = dyn Fn(Payload) -> BoxFuture<'static, Result<Payload, OverlayError>> + Send + Sync;

/// A registered handler.
#[derive(Clone)]
pub enum Handler {
    /// Fire-and-forget handler.
    Event(Arc<EventFn>),
    /// Call-style handler whose result may be acknowledged.
    Call(Arc<CallFn>),
}

impl Handler {
    /// Wraps an async one-way handler.
    pub fn event<F, Fut>(handler: F) -> Self
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), OverlayError>> + Send + 'static,
    {
        Self::Event(Arc::new(move |payload: Payload| handler(payload).boxed()))
    }

    /// Wraps an async call handler.
    pub fn call<F, Fut>(handler: F) -> Self
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, OverlayError>> + Send + 'static,
    {
        Self::Call(Arc::new(move |payload: Payload| handler(payload).boxed()))
    }

    /// Returns `true` for call-style handlers.
    #[must_use]
    pub const fn is_call(&self) -> bool {
        matches!(self, Self::Call(_))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event(_) => f.write_str("Handler::Event"),
            Self::Call(_) => f.write_str("Handler::Call"),
        }
    }
}
