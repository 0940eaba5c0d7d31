//! Server-side registry of namespaces, their peers and their rooms.
//!
//! [`NamespaceRegistry`] is the single owner of topology state. Every
//! mutation (peer arrival, removal, join, leave) goes through it, and
//! broadcast resolution reads a fresh view from it on every call. A
//! namespace entry is created on first reference and never destroyed; an
//! empty namespace behaves exactly like a missing one.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::sync::RwLock;
use utoipa::ToSchema;

use super::{Peer, PeerId, RoomRegistry};

/// Callback run for every peer entering a namespace.
pub type ConnectHandler = Arc<dyn Fn(Peer) -> BoxFuture<'static, ()> + Send + Sync>;

/// Namespace name with its current population.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct NamespaceSummary {
    /// Canonical namespace name.
    pub name: String,
    /// Connected peers.
    pub peers: usize,
    /// Non-empty rooms.
    pub rooms: usize,
}

#[derive(Default)]
struct NamespaceEntry {
    peers: HashMap<PeerId, Peer>,
    subscribers: Vec<ConnectHandler>,
    rooms: RoomRegistry,
}

impl fmt::Debug for NamespaceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceEntry")
            .field("peers", &self.peers.len())
            .field("subscribers", &self.subscribers.len())
            .field("rooms", &self.rooms.len())
            .finish()
    }
}

/// Namespace → peers, connect subscribers and rooms.
///
/// # Concurrency
///
/// One `RwLock` guards the whole map. It is never held while application
/// callbacks run, so subscribers and handlers may call back into the
/// registry freely.
#[derive(Debug, Default)]
pub struct NamespaceRegistry {
    namespaces: RwLock<HashMap<String, NamespaceEntry>>,
}

impl NamespaceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` to run once for every peer that later enters
    /// `namespace`.
    pub async fn on_connect<F, Fut>(&self, namespace: &str, handler: F)
    where
        F: Fn(Peer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: ConnectHandler = Arc::new(move |peer: Peer| handler(peer).boxed());
        self.namespaces
            .write()
            .await
            .entry(namespace.to_string())
            .or_default()
            .subscribers
            .push(handler);
    }

    /// Records `peer` in its namespace, then runs the namespace's connect
    /// subscribers in registration order.
    pub async fn add_peer(&self, peer: Peer) {
        let subscribers = {
            let mut map = self.namespaces.write().await;
            let entry = map.entry(peer.namespace().to_string()).or_default();
            entry.peers.insert(peer.id(), peer.clone());
            entry.subscribers.clone()
        };
        tracing::info!(peer_id = %peer.id(), namespace = peer.namespace(), "peer connected");

        for subscriber in subscribers {
            let run = AssertUnwindSafe(subscriber(peer.clone())).catch_unwind();
            if run.await.is_err() {
                tracing::warn!(peer_id = %peer.id(), namespace = peer.namespace(), "connect subscriber panicked");
            }
        }
    }

    /// Removes `peer` from its namespace and from every room it joined,
    /// then tears it down, which runs its disconnect subscribers.
    ///
    /// Returns `false` if the peer was not registered (already removed).
    pub async fn remove_peer(&self, peer: &Peer) -> bool {
        let removed = {
            let mut map = self.namespaces.write().await;
            match map.get_mut(peer.namespace()) {
                Some(entry) => {
                    // A replaced connection may share nothing but the
                    // namespace; only drop the entry that is this peer.
                    let registered = entry
                        .peers
                        .get(&peer.id())
                        .is_some_and(|current| current.same_handle(peer));
                    if registered {
                        entry.peers.remove(&peer.id());
                        Some(entry.rooms.remove_peer(peer.id()))
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        peer.shut_down();
        match removed {
            Some(rooms) => {
                tracing::info!(peer_id = %peer.id(), namespace = peer.namespace(), rooms = rooms.len(), "peer disconnected");
                true
            }
            None => false,
        }
    }

    /// Returns the peers of `namespace`, oldest connection first.
    pub async fn list_peers(&self, namespace: &str) -> Vec<Peer> {
        let map = self.namespaces.read().await;
        let mut peers: Vec<Peer> = map
            .get(namespace)
            .map(|entry| entry.peers.values().cloned().collect())
            .unwrap_or_default();
        peers.sort_by_key(|peer| (peer.connected_at(), peer.id()));
        peers
    }

    /// Looks up a connected peer.
    pub async fn get_peer(&self, namespace: &str, id: PeerId) -> Option<Peer> {
        let map = self.namespaces.read().await;
        map.get(namespace).and_then(|entry| entry.peers.get(&id).cloned())
    }

    /// Adds `peer` to `room` in its namespace.
    ///
    /// Idempotent. A peer that is no longer registered (disconnected) is
    /// left out; returns whether membership changed.
    pub async fn join(&self, peer: &Peer, room: &str) -> bool {
        let mut map = self.namespaces.write().await;
        let Some(entry) = map.get_mut(peer.namespace()) else {
            return false;
        };
        if !entry.peers.contains_key(&peer.id()) {
            tracing::debug!(peer_id = %peer.id(), room, "join ignored for unregistered peer");
            return false;
        }
        let joined = entry.rooms.join(peer.id(), room);
        if joined {
            tracing::debug!(peer_id = %peer.id(), namespace = peer.namespace(), room, "joined room");
        }
        joined
    }

    /// Removes `peer` from `room`. Idempotent; returns whether membership
    /// changed.
    pub async fn leave(&self, peer: &Peer, room: &str) -> bool {
        let mut map = self.namespaces.write().await;
        let Some(entry) = map.get_mut(peer.namespace()) else {
            return false;
        };
        let left = entry.rooms.leave(peer.id(), room);
        if left {
            tracing::debug!(peer_id = %peer.id(), namespace = peer.namespace(), room, "left room");
        }
        left
    }

    /// Rooms `peer` currently belongs to, sorted by name.
    pub async fn rooms_of(&self, peer: &Peer) -> Vec<String> {
        let map = self.namespaces.read().await;
        map.get(peer.namespace())
            .map(|entry| entry.rooms.rooms_of(peer.id()))
            .unwrap_or_default()
    }

    /// Current members of `room` in `namespace`. Never creates the
    /// namespace.
    pub async fn room_members(&self, namespace: &str, room: &str) -> Vec<Peer> {
        let map = self.namespaces.read().await;
        map.get(namespace)
            .map(|entry| collect_targets(entry, Some(room)))
            .unwrap_or_default()
    }

    /// Non-empty rooms of `namespace` with member counts, sorted by name.
    pub async fn list_rooms(&self, namespace: &str) -> Vec<(String, usize)> {
        let map = self.namespaces.read().await;
        map.get(namespace)
            .map(|entry| entry.rooms.room_sizes())
            .unwrap_or_default()
    }

    /// Every known namespace with its population, sorted by name.
    pub async fn list_namespaces(&self) -> Vec<NamespaceSummary> {
        let map = self.namespaces.read().await;
        let mut summaries: Vec<NamespaceSummary> = map
            .iter()
            .map(|(name, entry)| NamespaceSummary {
                name: name.clone(),
                peers: entry.peers.len(),
                rooms: entry.rooms.len(),
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Resolves the current peers of `namespace`, or of one of its rooms.
    ///
    /// Creates the namespace entry if this is its first reference.
    pub async fn resolve(&self, namespace: &str, room: Option<&str>) -> Vec<Peer> {
        {
            let map = self.namespaces.read().await;
            if let Some(entry) = map.get(namespace) {
                return collect_targets(entry, room);
            }
        }
        let mut map = self.namespaces.write().await;
        let entry = map.entry(namespace.to_string()).or_default();
        collect_targets(entry, room)
    }

    /// Number of namespaces ever referenced.
    pub async fn len(&self) -> usize {
        self.namespaces.read().await.len()
    }

    /// Returns `true` if no namespace was ever referenced.
    pub async fn is_empty(&self) -> bool {
        self.namespaces.read().await.is_empty()
    }
}

fn collect_targets(entry: &NamespaceEntry, room: Option<&str>) -> Vec<Peer> {
    match room {
        None => entry.peers.values().cloned().collect(),
        Some(room) => entry
            .rooms
            .members(room)
            .into_iter()
            .filter_map(|id| entry.peers.get(&id).cloned())
            .collect(),
    }
}
