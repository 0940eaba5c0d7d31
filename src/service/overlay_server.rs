//! Server-side connection lifecycle and administrative operations.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::broadcast_router::{BroadcastReport, BroadcastRouter};
use crate::domain::{NamespaceRegistry, NamespaceSummary, Payload, Peer, PeerId};
use crate::error::OverlayError;
use crate::transport::{Frame, InboundEvent, Link};

/// Glue between physical links and the topology.
///
/// Every accepted logical connection follows the same path: open a channel
/// on the link → record the [`Peer`] and run the namespace's connect
/// subscribers → confirm with `connected` → dispatch inbound events until
/// the channel closes → remove the peer.
#[derive(Debug, Clone)]
pub struct OverlayServer {
    registry: Arc<NamespaceRegistry>,
    router: BroadcastRouter,
}

impl Default for OverlayServer {
    fn default() -> Self {
        Self::new(Arc::new(NamespaceRegistry::new()))
    }
}

impl OverlayServer {
    /// Creates a server over `registry`.
    #[must_use]
    pub fn new(registry: Arc<NamespaceRegistry>) -> Self {
        let router = BroadcastRouter::new(Arc::clone(&registry));
        Self { registry, router }
    }

    /// Returns the namespace registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<NamespaceRegistry> {
        &self.registry
    }

    /// Returns the broadcast router.
    #[must_use]
    pub fn router(&self) -> &BroadcastRouter {
        &self.router
    }

    /// Registers a connect subscriber for `namespace`.
    pub async fn on_connect<F, Fut>(&self, namespace: &str, handler: F)
    where
        F: Fn(Peer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.registry.on_connect(namespace, handler).await;
    }

    /// Drives one physical link until its inbound frame stream ends, then
    /// shuts it down, which tears down every peer it carried.
    pub async fn serve_link(&self, link: Link, mut inbound: mpsc::Receiver<Frame>) {
        let closed = link.closed_signal();
        loop {
            tokio::select! {
                biased;
                () = closed.cancelled() => break,
                frame = inbound.recv() => match frame {
                    Some(frame) => self.handle_frame(&link, frame),
                    None => break,
                },
            }
        }
        link.shutdown();
    }

    /// Routes one inbound frame of `link`, accepting `connect` requests.
    pub fn handle_frame(&self, link: &Link, frame: Frame) {
        if let Some(namespace) = link.deliver(frame) {
            self.accept(link, &namespace);
        }
    }

    /// Accepts a `connect` request for `namespace` on `link`.
    ///
    /// The channel is opened before this returns, so events the client
    /// sends right after its handshake queue up for the new peer. The rest
    /// of the lifecycle runs on its own task. Returns the new peer's id.
    pub fn accept(&self, link: &Link, namespace: &str) -> Option<PeerId> {
        if !namespace.starts_with('/') {
            tracing::warn!(namespace, "connect for non-canonical namespace refused");
            let _ = link.send(Frame::Disconnect {
                namespace: namespace.to_string(),
            });
            return None;
        }
        let (channel, inbound) = link.open_channel(namespace);
        let peer = Peer::from_channel(PeerId::new(), channel);
        let id = peer.id();
        let server = self.clone();
        tokio::spawn(async move { server.run_peer(peer, inbound).await });
        Some(id)
    }

    async fn run_peer(&self, peer: Peer, inbound: mpsc::UnboundedReceiver<InboundEvent>) {
        self.registry.add_peer(peer.clone()).await;

        // A reconnect may have replaced the channel while subscribers ran.
        let confirmed = match peer.link() {
            Some(_) if !peer.is_connected() => Err(OverlayError::TransportError(
                "channel replaced before confirmation".to_string(),
            )),
            Some(link) => link.send(Frame::Connected {
                namespace: peer.namespace().to_string(),
                peer_id: peer.id(),
            }),
            None => Ok(()),
        };
        match confirmed {
            Ok(()) => peer.pump(inbound).await,
            Err(err) => {
                tracing::warn!(peer_id = %peer.id(), namespace = peer.namespace(), error = %err, "handshake not delivered");
            }
        }

        self.registry.remove_peer(&peer).await;
    }

    /// Looks up a connected peer.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::PeerNotFound`] if no such peer is connected
    /// to `namespace`.
    pub async fn peer(&self, namespace: &str, id: PeerId) -> Result<Peer, OverlayError> {
        self.registry
            .get_peer(namespace, id)
            .await
            .ok_or(OverlayError::PeerNotFound(id))
    }

    /// Disconnects a peer from the server side.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::PeerNotFound`] if no such peer is connected.
    pub async fn kick(&self, namespace: &str, id: PeerId) -> Result<(), OverlayError> {
        let peer = self.peer(namespace, id).await?;
        peer.disconnect();
        self.registry.remove_peer(&peer).await;
        tracing::info!(peer_id = %id, namespace, "peer kicked");
        Ok(())
    }

    /// Adds a connected peer to `room`. Returns whether membership changed.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::PeerNotFound`] if no such peer is connected.
    pub async fn join(&self, namespace: &str, room: &str, id: PeerId) -> Result<bool, OverlayError> {
        let peer = self.peer(namespace, id).await?;
        Ok(self.registry.join(&peer, room).await)
    }

    /// Removes a connected peer from `room`. Returns whether membership
    /// changed.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::PeerNotFound`] if no such peer is connected.
    pub async fn leave(&self, namespace: &str, room: &str, id: PeerId) -> Result<bool, OverlayError> {
        let peer = self.peer(namespace, id).await?;
        Ok(self.registry.leave(&peer, room).await)
    }

    /// Calls `event` on a connected client and waits for its acknowledgement.
    ///
    /// # Errors
    ///
    /// [`OverlayError::PeerNotFound`] for an unknown peer, otherwise the
    /// failures of [`crate::call::call`].
    pub async fn call(
        &self,
        namespace: &str,
        id: PeerId,
        event: &str,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Payload, OverlayError> {
        let peer = self.peer(namespace, id).await?;
        peer.call(event, payload, timeout).await
    }

    /// Namespace-wide broadcast. See [`BroadcastRouter::broadcast`].
    pub async fn broadcast(&self, namespace: &str, event: &str, payload: Payload) -> BroadcastReport {
        self.router.broadcast(namespace, event, payload).await
    }

    /// Room broadcast from the server. See [`BroadcastRouter::broadcast_room`].
    pub async fn broadcast_room(
        &self,
        namespace: &str,
        room: &str,
        event: &str,
        payload: Payload,
    ) -> BroadcastReport {
        self.router.broadcast_room(namespace, room, event, payload).await
    }

    /// Peers of `namespace`, oldest first.
    pub async fn list_peers(&self, namespace: &str) -> Vec<Peer> {
        self.registry.list_peers(namespace).await
    }

    /// Every known namespace with its population.
    pub async fn list_namespaces(&self) -> Vec<NamespaceSummary> {
        self.registry.list_namespaces().await
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::transport::memory::{self, MemoryEnd};
    use crate::transport::{AckReply, Transport};

    async fn connect(server: &OverlayServer, namespace: &str) -> (MemoryEnd, PeerId) {
        let (mut client, remote) = memory::pair(32);
        let serving = server.clone();
        tokio::spawn(async move { serving.serve_link(remote.link, remote.inbound).await });
        let (_channel, _events) = client.link.open_channel(namespace);
        tokio_test::assert_ok!(client.link.send(Frame::Connect {
            namespace: namespace.to_string(),
        }));
        let Some(Frame::Connected { peer_id, .. }) = client.inbound.recv().await else {
            panic!("expected connected frame");
        };
        (client, peer_id)
    }

    #[tokio::test]
    async fn handshake_registers_peer_after_subscribers() {
        let server = OverlayServer::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        server
            .on_connect("/chat", move |_peer| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        let (_client, id) = connect(&server, "/chat").await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        tokio_test::assert_ok!(server.peer("/chat", id).await);
        assert_eq!(server.list_peers("/chat").await.len(), 1);
    }

    #[tokio::test]
    async fn handlers_from_connect_subscriber_answer_calls() {
        let server = OverlayServer::default();
        server
            .on_connect("/", |peer| async move {
                peer.on_call("ping", |payload| async move {
                    let n = payload.get("n").and_then(Payload::as_i64).unwrap_or(0);
                    Ok(json!({"n": n + 1}))
                });
            })
            .await;
        let (mut client, _id) = connect(&server, "/").await;
        tokio_test::assert_ok!(client.link.send(Frame::Event {
            namespace: "/".to_string(),
            event: "ping".to_string(),
            payload: json!({"n": 1}),
            ack_id: Some(0),
        }));
        assert_eq!(
            client.inbound.recv().await,
            Some(Frame::Ack {
                namespace: "/".to_string(),
                ack_id: 0,
                reply: AckReply::Ok(json!({"n": 2})),
            })
        );
    }

    #[tokio::test]
    async fn client_disconnect_removes_peer() {
        let server = OverlayServer::default();
        let (client, id) = connect(&server, "/chat").await;
        let Ok(peer) = server.peer("/chat", id).await else {
            panic!("peer should be registered");
        };
        server.registry().join(&peer, "lobby").await;
        let closed = peer.closed_signal();

        tokio_test::assert_ok!(client.link.send(Frame::Disconnect {
            namespace: "/chat".to_string(),
        }));
        closed.cancelled().await;
        for _ in 0..100 {
            if server.peer("/chat", id).await.is_err() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(server.peer("/chat", id).await.is_err());
        assert!(server.registry().room_members("/chat", "lobby").await.is_empty());
    }

    #[tokio::test]
    async fn kick_disconnects_and_unregisters() {
        let server = OverlayServer::default();
        let (mut client, id) = connect(&server, "/chat").await;
        tokio_test::assert_ok!(server.kick("/chat", id).await);
        assert_eq!(
            client.inbound.recv().await,
            Some(Frame::Disconnect {
                namespace: "/chat".to_string(),
            })
        );
        assert_eq!(
            server.kick("/chat", id).await,
            Err(OverlayError::PeerNotFound(id))
        );
    }

    #[tokio::test]
    async fn admin_join_requires_connected_peer() {
        let server = OverlayServer::default();
        let (_client, id) = connect(&server, "/chat").await;
        assert_eq!(server.join("/chat", "lobby", id).await, Ok(true));
        assert_eq!(server.join("/chat", "lobby", id).await, Ok(false));
        assert_eq!(server.leave("/chat", "lobby", id).await, Ok(true));
        let stranger = PeerId::new();
        assert_eq!(
            server.join("/chat", "lobby", stranger).await,
            Err(OverlayError::PeerNotFound(stranger))
        );
    }

    #[tokio::test]
    async fn non_canonical_namespace_is_refused() {
        let server = OverlayServer::default();
        let (_client, remote) = memory::pair(4);
        assert!(server.accept(&remote.link, "chat").is_none());
        assert_eq!(remote.link.channel_count(), 0);
    }

    #[tokio::test]
    async fn dropping_the_link_tears_down_every_peer() {
        let server = OverlayServer::default();
        let (client, id) = connect(&server, "/").await;
        let Ok(peer) = server.peer("/", id).await else {
            panic!("peer should be registered");
        };
        client.link.shutdown();
        peer.closed_signal().cancelled().await;
        assert!(peer.transport().is_closed());
    }
}
