//! Handle to one logical connection.
//!
//! A [`Peer`] is the same type on both sides of the wire: the client's
//! connection to a namespace and the server's view of that client. It owns
//! the connection's [`Transport`], its [`EventDispatcher`] and the calls in
//! flight through it.

use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Payload, PeerId};
use crate::call::{self, CallTable};
use crate::dispatch::{EventDispatcher, Handler};
use crate::error::OverlayError;
use crate::transport::{Channel, InboundEvent, Link, Transport};

type DisconnectFn = Box<dyn FnOnce(&Peer) + Send>;

/// Cheaply cloneable handle to a logical connection.
///
/// Equality and hashing use the [`PeerId`] only.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

struct PeerInner {
    id: PeerId,
    namespace: String,
    transport: Arc<dyn Transport>,
    link: Option<Link>,
    dispatcher: EventDispatcher,
    calls: CallTable,
    disconnect_handlers: Mutex<Vec<DisconnectFn>>,
    torn_down: AtomicBool,
    connected_at: DateTime<Utc>,
}

impl Peer {
    /// Creates a peer over an arbitrary transport.
    #[must_use]
    pub fn new(id: PeerId, namespace: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self::build(id, namespace.into(), transport, None)
    }

    /// Creates a peer over a namespace [`Channel`], remembering its link so
    /// further namespaces can be multiplexed over it.
    #[must_use]
    pub fn from_channel(id: PeerId, channel: Channel) -> Self {
        let namespace = channel.namespace().to_string();
        let link = channel.link().clone();
        Self::build(id, namespace, Arc::new(channel), Some(link))
    }

    fn build(
        id: PeerId,
        namespace: String,
        transport: Arc<dyn Transport>,
        link: Option<Link>,
    ) -> Self {
        Self {
            inner: Arc::new(PeerInner {
                id,
                namespace,
                transport,
                link,
                dispatcher: EventDispatcher::new(),
                calls: CallTable::new(),
                disconnect_handlers: Mutex::new(Vec::new()),
                torn_down: AtomicBool::new(false),
                connected_at: Utc::now(),
            }),
        }
    }

    /// Identifier shared by both ends of the connection.
    #[must_use]
    pub fn id(&self) -> PeerId {
        self.inner.id
    }

    /// Namespace this connection belongs to.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// When this handle was created.
    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.inner.connected_at
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Physical link, when the peer rides a multiplexed [`Channel`].
    #[must_use]
    pub fn link(&self) -> Option<&Link> {
        self.inner.link.as_ref()
    }

    /// Handler table of this connection.
    #[must_use]
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    /// Calls currently awaiting acknowledgement.
    #[must_use]
    pub fn calls(&self) -> &CallTable {
        &self.inner.calls
    }

    /// Returns `true` if both handles point at the same connection, not
    /// merely the same id.
    #[must_use]
    pub fn same_handle(&self, other: &Peer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns `true` until the connection closes or the peer is torn down.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.inner.torn_down.load(Ordering::Acquire) && !self.inner.transport.is_closed()
    }

    /// Token cancelled when the underlying connection closes.
    #[must_use]
    pub fn closed_signal(&self) -> CancellationToken {
        self.inner.transport.closed_signal()
    }

    /// Sends a one-way event to the other end.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::TransportError`] if the connection cannot
    /// take the frame.
    pub fn emit(&self, event: &str, payload: Payload) -> Result<(), OverlayError> {
        self.inner.transport.emit(event, payload)
    }

    /// Calls `event` on the other end and waits for its acknowledgement.
    ///
    /// # Errors
    ///
    /// See [`call::call`].
    pub async fn call(
        &self,
        event: &str,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Payload, OverlayError> {
        call::call(self, event, payload, timeout).await
    }

    /// Registers a one-way handler for events arriving on this connection.
    pub fn on<F, Fut>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), OverlayError>> + Send + 'static,
    {
        self.inner.dispatcher.register(event, Handler::event(handler));
    }

    /// Registers a call handler; its result acknowledges the caller.
    pub fn on_call<F, Fut>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, OverlayError>> + Send + 'static,
    {
        call::register_call_handler(&self.inner.dispatcher, event, handler);
    }

    /// Registers a callback run once when this peer is torn down. Runs
    /// immediately if that already happened.
    pub fn on_disconnect<F>(&self, handler: F)
    where
        F: FnOnce(&Peer) + Send + 'static,
    {
        {
            let mut handlers = self.inner.disconnect_handlers.lock();
            if !self.inner.torn_down.load(Ordering::Acquire) {
                handlers.push(Box::new(handler));
                return;
            }
        }
        handler(self);
    }

    /// Closes the logical connection. Teardown follows once the lifecycle
    /// glue observes the closure.
    pub fn disconnect(&self) {
        self.inner.transport.close();
    }

    /// Dispatches one inbound event to this peer's handlers.
    pub async fn dispatch(&self, inbound: InboundEvent) -> usize {
        self.inner
            .dispatcher
            .dispatch(&inbound.event, inbound.payload, inbound.ack)
            .await
    }

    /// Dispatches inbound events until the connection closes or the queue
    /// ends.
    ///
    /// Dispatches start in arrival order but run concurrently: a handler
    /// that suspends holds up neither later events nor acknowledgements.
    /// Handlers still running when the connection closes are dropped.
    pub async fn pump(&self, mut inbound: mpsc::UnboundedReceiver<InboundEvent>) {
        let closed = self.closed_signal();
        let mut in_flight = FuturesUnordered::new();
        loop {
            tokio::select! {
                biased;
                () = closed.cancelled() => break,
                next = inbound.recv() => match next {
                    Some(event) => in_flight.push(self.dispatch(event)),
                    None => break,
                },
                Some(_) = in_flight.next(), if !in_flight.is_empty() => {}
            }
        }
    }

    /// Tears the peer down: closes the transport, fails pending calls,
    /// drops its handlers and runs the disconnect callbacks. Only the first
    /// invocation has any effect; returns whether this one did.
    pub fn shut_down(&self) -> bool {
        let handlers = {
            let mut handlers = self.inner.disconnect_handlers.lock();
            if self.inner.torn_down.swap(true, Ordering::AcqRel) {
                return false;
            }
            std::mem::take(&mut *handlers)
        };
        self.inner.transport.close();
        let failed = self.inner.calls.fail_all("peer disconnected");
        self.inner.dispatcher.unregister_all();
        for handler in handlers {
            handler(self);
        }
        tracing::debug!(peer_id = %self.inner.id, namespace = %self.inner.namespace, failed_calls = failed, "peer torn down");
        true
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Peer {}

impl Hash for Peer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.inner.id)
            .field("namespace", &self.inner.namespace)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}
