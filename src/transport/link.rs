//! Physical link multiplexing namespace channels.
//!
//! A [`Link`] owns the outbound frame queue of one physical connection and
//! routes inbound frames to the [`Channel`] of their namespace. Ack ids live
//! here and nowhere else: a [`Channel`] hands the core a oneshot receiver,
//! and the link matches the remote `ack` frame back to its sender.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{AckReceiver, AckReply, AckResponder, Frame, InboundEvent, Transport};
use crate::domain::{Payload, PeerId};
use crate::error::OverlayError;

/// One physical connection carrying any number of namespace channels.
///
/// Cheap to clone; all clones share the same state.
#[derive(Debug, Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

#[derive(Debug)]
struct LinkInner {
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
    channels: Mutex<HashMap<String, Arc<ChannelState>>>,
    handshakes: Mutex<HashMap<String, oneshot::Sender<PeerId>>>,
    close_when_idle: bool,
    closed: CancellationToken,
}

#[derive(Debug)]
struct ChannelState {
    namespace: String,
    inbound: mpsc::UnboundedSender<InboundEvent>,
    acks: Mutex<HashMap<u64, oneshot::Sender<AckReply>>>,
    next_ack_id: AtomicU64,
    closed: CancellationToken,
}

impl ChannelState {
    fn shut(&self) {
        self.closed.cancel();
        // Dropping the senders fails every outstanding ack receiver.
        self.acks.lock().clear();
    }
}

impl Link {
    /// Creates a server-side link writing frames into `outbound`.
    #[must_use]
    pub fn new(outbound: mpsc::Sender<Frame>) -> Self {
        Self::build(outbound, false)
    }

    /// Creates a client-side link. It shuts itself down once its last
    /// channel closes.
    #[must_use]
    pub fn client(outbound: mpsc::Sender<Frame>) -> Self {
        Self::build(outbound, true)
    }

    fn build(outbound: mpsc::Sender<Frame>, close_when_idle: bool) -> Self {
        Self {
            inner: Arc::new(LinkInner {
                outbound: Mutex::new(Some(outbound)),
                channels: Mutex::new(HashMap::new()),
                handshakes: Mutex::new(HashMap::new()),
                close_when_idle,
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Queues a frame for the physical connection.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::TransportError`] if the link is shut down or
    /// its outbound queue is full.
    pub fn send(&self, frame: Frame) -> Result<(), OverlayError> {
        let outbound = self.inner.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            return Err(link_closed());
        };
        tx.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => {
                OverlayError::TransportError("outbound queue full".to_string())
            }
            TrySendError::Closed(_) => link_closed(),
        })
    }

    /// Opens the channel for `namespace`, replacing (and closing) any
    /// channel already open for it on this link.
    ///
    /// Returns the channel and the queue its inbound events arrive on.
    pub fn open_channel(&self, namespace: &str) -> (Channel, mpsc::UnboundedReceiver<InboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(ChannelState {
            namespace: namespace.to_string(),
            inbound: tx,
            acks: Mutex::new(HashMap::new()),
            next_ack_id: AtomicU64::new(0),
            closed: self.inner.closed.child_token(),
        });
        let replaced = self
            .inner
            .channels
            .lock()
            .insert(namespace.to_string(), Arc::clone(&state));
        if let Some(old) = replaced {
            tracing::debug!(namespace, "replacing open channel");
            old.shut();
        }
        let channel = Channel {
            link: self.clone(),
            state,
        };
        (channel, rx)
    }

    /// Registers interest in the `connected` reply for `namespace`.
    ///
    /// At most one handshake per namespace may be pending on a link; a
    /// waiter whose receiver was dropped no longer counts.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::TransportError`] while another handshake for
    /// `namespace` is still pending.
    pub fn expect_connected(&self, namespace: &str) -> Result<oneshot::Receiver<PeerId>, OverlayError> {
        let mut handshakes = self.inner.handshakes.lock();
        if handshakes.get(namespace).is_some_and(|tx| !tx.is_closed()) {
            return Err(OverlayError::TransportError(format!(
                "handshake for {namespace} already in progress"
            )));
        }
        let (tx, rx) = oneshot::channel();
        handshakes.insert(namespace.to_string(), tx);
        Ok(rx)
    }

    /// Routes one inbound frame.
    ///
    /// Returns the namespace of a `connect` request, which only the owner of
    /// the link can accept; every other frame is handled here.
    pub fn deliver(&self, frame: Frame) -> Option<String> {
        match frame {
            Frame::Connect { namespace } => return Some(namespace),
            Frame::Connected { namespace, peer_id } => {
                let waiter = self.inner.handshakes.lock().remove(&namespace);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(peer_id);
                    }
                    None => tracing::debug!(namespace, "unexpected connected frame"),
                }
            }
            Frame::Disconnect { namespace } => {
                if let Some(state) = self.detach(&namespace) {
                    tracing::debug!(namespace, "remote closed channel");
                    state.shut();
                }
                self.shutdown_if_idle();
            }
            Frame::Event {
                namespace,
                event,
                payload,
                ack_id,
            } => {
                let Some(state) = self.state(&namespace) else {
                    tracing::debug!(namespace, event, "event for unopened namespace dropped");
                    return None;
                };
                let ack = ack_id.map(|id| self.responder(&state, id));
                let inbound = InboundEvent {
                    event,
                    payload,
                    ack,
                };
                if state.inbound.send(inbound).is_err() {
                    tracing::debug!(namespace, "channel no longer dispatching; event dropped");
                }
            }
            Frame::Ack {
                namespace,
                ack_id,
                reply,
            } => {
                let waiter = self
                    .state(&namespace)
                    .and_then(|state| state.acks.lock().remove(&ack_id));
                match waiter {
                    Some(tx) => {
                        if tx.send(reply).is_err() {
                            tracing::debug!(namespace, ack_id, "late acknowledgement ignored");
                        }
                    }
                    None => tracing::debug!(namespace, ack_id, "unknown acknowledgement ignored"),
                }
            }
        }
        None
    }

    /// Tears down the physical connection: every channel closes, pending
    /// handshakes fail and the outbound queue is released.
    pub fn shutdown(&self) {
        if self.inner.closed.is_cancelled() {
            return;
        }
        self.inner.closed.cancel();
        self.inner.outbound.lock().take();
        let channels: Vec<Arc<ChannelState>> =
            self.inner.channels.lock().drain().map(|(_, state)| state).collect();
        for state in &channels {
            state.shut();
        }
        self.inner.handshakes.lock().clear();
        tracing::debug!(channels = channels.len(), "link shut down");
    }

    /// Returns `true` once [`Link::shutdown`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Token cancelled when the link shuts down.
    #[must_use]
    pub fn closed_signal(&self) -> CancellationToken {
        self.inner.closed.clone()
    }

    /// Returns the number of open channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.inner.channels.lock().len()
    }

    fn state(&self, namespace: &str) -> Option<Arc<ChannelState>> {
        self.inner.channels.lock().get(namespace).cloned()
    }

    fn detach(&self, namespace: &str) -> Option<Arc<ChannelState>> {
        self.inner.channels.lock().remove(namespace)
    }

    fn detach_exact(&self, state: &Arc<ChannelState>) {
        let mut channels = self.inner.channels.lock();
        if channels
            .get(&state.namespace)
            .is_some_and(|current| Arc::ptr_eq(current, state))
        {
            channels.remove(&state.namespace);
        }
    }

    fn shutdown_if_idle(&self) {
        if self.inner.close_when_idle && self.channel_count() == 0 {
            self.shutdown();
        }
    }

    /// Reply path for `ack_id`, bound to the channel the event arrived on.
    /// Once that channel closes the reply is refused rather than sent.
    fn responder(&self, state: &Arc<ChannelState>, ack_id: u64) -> AckResponder {
        let link = self.clone();
        let state = Arc::clone(state);
        AckResponder::new(move |reply| {
            if state.closed.is_cancelled() {
                return Err(OverlayError::TransportError(format!(
                    "channel {} is closed",
                    state.namespace
                )));
            }
            link.send(Frame::Ack {
                namespace: state.namespace.clone(),
                ack_id,
                reply,
            })
        })
    }
}

/// A namespace connection multiplexed over a [`Link`].
#[derive(Debug, Clone)]
pub struct Channel {
    link: Link,
    state: Arc<ChannelState>,
}

impl Channel {
    /// Namespace this channel is bound to.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.state.namespace
    }

    /// The physical link carrying this channel.
    #[must_use]
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Number of acknowledgement slots still awaiting a reply.
    #[must_use]
    pub fn pending_acks(&self) -> usize {
        self.state
            .acks
            .lock()
            .values()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    fn ensure_open(&self) -> Result<(), OverlayError> {
        if self.state.closed.is_cancelled() {
            return Err(OverlayError::TransportError(format!(
                "channel {} is closed",
                self.state.namespace
            )));
        }
        Ok(())
    }
}

impl Transport for Channel {
    fn emit(&self, event: &str, payload: Payload) -> Result<(), OverlayError> {
        self.ensure_open()?;
        self.link.send(Frame::Event {
            namespace: self.state.namespace.clone(),
            event: event.to_string(),
            payload,
            ack_id: None,
        })
    }

    fn emit_with_ack(&self, event: &str, payload: Payload) -> Result<AckReceiver, OverlayError> {
        self.ensure_open()?;
        let ack_id = self.state.next_ack_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut acks = self.state.acks.lock();
            // Slots whose caller gave up (timed out) are pruned here.
            acks.retain(|_, pending| !pending.is_closed());
            acks.insert(ack_id, tx);
        }
        let sent = self.ensure_open().and_then(|()| {
            self.link.send(Frame::Event {
                namespace: self.state.namespace.clone(),
                event: event.to_string(),
                payload,
                ack_id: Some(ack_id),
            })
        });
        if let Err(err) = sent {
            self.state.acks.lock().remove(&ack_id);
            return Err(err);
        }
        Ok(rx)
    }

    fn close(&self) {
        if self.state.closed.is_cancelled() {
            return;
        }
        let _ = self.link.send(Frame::Disconnect {
            namespace: self.state.namespace.clone(),
        });
        self.link.detach_exact(&self.state);
        self.state.shut();
        self.link.shutdown_if_idle();
    }

    fn is_closed(&self) -> bool {
        self.state.closed.is_cancelled()
    }

    fn closed_signal(&self) -> CancellationToken {
        self.state.closed.clone()
    }
}

fn link_closed() -> OverlayError {
    OverlayError::TransportError("link closed".to_string())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn link() -> (Link, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(16);
        (Link::new(tx), rx)
    }

    #[tokio::test]
    async fn emit_writes_event_frame() {
        let (link, mut out) = link();
        let (channel, _inbound) = link.open_channel("/chat");
        tokio_test::assert_ok!(channel.emit("msg", json!("hi")));
        let Some(frame) = out.recv().await else {
            panic!("expected a frame");
        };
        assert_eq!(
            frame,
            Frame::Event {
                namespace: "/chat".to_string(),
                event: "msg".to_string(),
                payload: json!("hi"),
                ack_id: None,
            }
        );
    }

    #[tokio::test]
    async fn ack_frame_resolves_matching_receiver() {
        let (link, mut out) = link();
        let (channel, _inbound) = link.open_channel("/");
        let Ok(rx) = channel.emit_with_ack("ping", json!({"n": 1})) else {
            panic!("emit_with_ack failed");
        };
        let Some(Frame::Event {
            ack_id: Some(ack_id),
            ..
        }) = out.recv().await
        else {
            panic!("expected an event frame with an ack id");
        };
        assert_eq!(channel.pending_acks(), 1);

        link.deliver(Frame::Ack {
            namespace: "/".to_string(),
            ack_id,
            reply: AckReply::Ok(json!({"n": 2})),
        });
        assert_eq!(rx.await.ok(), Some(AckReply::Ok(json!({"n": 2}))));
        assert_eq!(channel.pending_acks(), 0);
    }

    #[tokio::test]
    async fn closing_channel_fails_outstanding_acks() {
        let (link, mut out) = link();
        let (channel, _inbound) = link.open_channel("/");
        let Ok(rx) = channel.emit_with_ack("ping", Payload::Null) else {
            panic!("emit_with_ack failed");
        };
        channel.close();
        assert!(rx.await.is_err());
        assert!(channel.is_closed());
        assert!(channel.closed_signal().is_cancelled());

        let _event = out.recv().await;
        assert_eq!(
            out.recv().await,
            Some(Frame::Disconnect {
                namespace: "/".to_string()
            })
        );
        tokio_test::assert_err!(channel.emit("late", Payload::Null));
    }

    #[tokio::test]
    async fn inbound_event_carries_responder_when_acked() {
        let (link, mut out) = link();
        let (_channel, mut inbound) = link.open_channel("/");
        link.deliver(Frame::Event {
            namespace: "/".to_string(),
            event: "sum".to_string(),
            payload: json!([1, 2]),
            ack_id: Some(9),
        });
        let Some(event) = inbound.recv().await else {
            panic!("expected an inbound event");
        };
        let Some(ack) = event.ack else {
            panic!("expected a responder");
        };
        tokio_test::assert_ok!(ack.reply(AckReply::Ok(json!(3))));
        assert_eq!(
            out.recv().await,
            Some(Frame::Ack {
                namespace: "/".to_string(),
                ack_id: 9,
                reply: AckReply::Ok(json!(3)),
            })
        );
    }

    #[tokio::test]
    async fn reply_after_channel_close_is_refused() {
        let (link, mut out) = link();
        let (channel, mut inbound) = link.open_channel("/chat");
        link.deliver(Frame::Event {
            namespace: "/chat".to_string(),
            event: "sum".to_string(),
            payload: json!([1, 2]),
            ack_id: Some(2),
        });
        let Some(InboundEvent { ack: Some(ack), .. }) = inbound.recv().await else {
            panic!("expected an inbound event with a responder");
        };

        channel.close();
        tokio_test::assert_err!(ack.reply(AckReply::Ok(json!(3))));
        assert_eq!(
            out.recv().await,
            Some(Frame::Disconnect {
                namespace: "/chat".to_string()
            })
        );
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn one_pending_handshake_per_namespace() {
        let (link, _out) = link();
        let Ok(first) = link.expect_connected("/chat") else {
            panic!("first handshake refused");
        };
        tokio_test::assert_err!(link.expect_connected("/chat"));
        tokio_test::assert_ok!(link.expect_connected("/other"));

        let id = PeerId::new();
        link.deliver(Frame::Connected {
            namespace: "/chat".to_string(),
            peer_id: id,
        });
        assert_eq!(first.await.ok(), Some(id));
        tokio_test::assert_ok!(link.expect_connected("/chat"));
    }

    #[test]
    fn abandoned_handshake_frees_its_namespace() {
        let (link, _out) = link();
        let Ok(abandoned) = link.expect_connected("/chat") else {
            panic!("handshake refused");
        };
        drop(abandoned);
        tokio_test::assert_ok!(link.expect_connected("/chat"));
    }

    #[test]
    fn connect_frames_are_returned_to_owner() {
        let (link, _out) = link();
        let requested = link.deliver(Frame::Connect {
            namespace: "/chat".to_string(),
        });
        assert_eq!(requested.as_deref(), Some("/chat"));
    }

    #[tokio::test]
    async fn remote_disconnect_closes_channel() {
        let (link, _out) = link();
        let (channel, _inbound) = link.open_channel("/chat");
        link.deliver(Frame::Disconnect {
            namespace: "/chat".to_string(),
        });
        assert!(channel.is_closed());
        assert_eq!(link.channel_count(), 0);
        assert!(!link.is_closed());
    }

    #[tokio::test]
    async fn client_link_shuts_down_when_last_channel_closes() {
        let (tx, _out) = mpsc::channel(16);
        let link = Link::client(tx);
        let (root, _a) = link.open_channel("/");
        let (chat, _b) = link.open_channel("/chat");
        chat.close();
        assert!(!link.is_closed());
        root.close();
        assert!(link.is_closed());
    }

    #[tokio::test]
    async fn shutdown_closes_every_channel() {
        let (link, _out) = link();
        let (a, _a) = link.open_channel("/");
        let (b, _b) = link.open_channel("/chat");
        link.shutdown();
        assert!(a.is_closed());
        assert!(b.is_closed());
        tokio_test::assert_err!(link.send(Frame::Connect {
            namespace: "/".to_string()
        }));
    }

    #[tokio::test]
    async fn full_outbound_queue_is_a_transport_error() {
        let (tx, _out) = mpsc::channel(1);
        let link = Link::new(tx);
        let (channel, _inbound) = link.open_channel("/");
        tokio_test::assert_ok!(channel.emit("a", Payload::Null));
        let Err(err) = channel.emit("b", Payload::Null) else {
            panic!("second emit should not fit");
        };
        assert_eq!(
            err,
            OverlayError::TransportError("outbound queue full".to_string())
        );
    }

    #[tokio::test]
    async fn reopening_namespace_replaces_channel() {
        let (link, _out) = link();
        let (first, _a) = link.open_channel("/");
        let (second, _b) = link.open_channel("/");
        assert!(first.is_closed());
        assert!(!second.is_closed());
        // Closing the stale channel must not detach the new one.
        first.close();
        assert_eq!(link.channel_count(), 1);
    }
}
