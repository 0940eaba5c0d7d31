//! Fan-out of one event to a computed set of peers.

use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{NamespaceRegistry, Payload, Peer, PeerId};

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct BroadcastReport {
    /// Peers the selector resolved to.
    pub targeted: usize,
    /// Peers whose transport accepted the event.
    pub delivered: usize,
    /// Peers whose transport refused it.
    pub failed: usize,
}

/// Resolves broadcast selectors against the [`NamespaceRegistry`] and emits
/// to every resolved peer independently.
///
/// Targets are resolved from registry state at the moment of the call and
/// never cached. A failed delivery is logged and counted; it never stops
/// the rest of the fan-out.
#[derive(Debug, Clone)]
pub struct BroadcastRouter {
    registry: Arc<NamespaceRegistry>,
}

impl BroadcastRouter {
    /// Creates a router over `registry`.
    #[must_use]
    pub fn new(registry: Arc<NamespaceRegistry>) -> Self {
        Self { registry }
    }

    /// Delivers to every peer in `namespace`, the triggering peer included.
    pub async fn broadcast(&self, namespace: &str, event: &str, payload: Payload) -> BroadcastReport {
        let targets = self.registry.resolve(namespace, None).await;
        fan_out(namespace, None, targets, None, event, &payload)
    }

    /// Delivers to every peer in the sender's namespace except the sender.
    pub async fn broadcast_except_sender(
        &self,
        sender: &Peer,
        event: &str,
        payload: Payload,
    ) -> BroadcastReport {
        let targets = self.registry.resolve(sender.namespace(), None).await;
        fan_out(sender.namespace(), None, targets, Some(sender.id()), event, &payload)
    }

    /// Delivers to every member of `room` in the sender's namespace except
    /// the sender, whether or not the sender is a member.
    pub async fn broadcast_to_room(
        &self,
        sender: &Peer,
        room: &str,
        event: &str,
        payload: Payload,
    ) -> BroadcastReport {
        let targets = self.registry.resolve(sender.namespace(), Some(room)).await;
        fan_out(sender.namespace(), Some(room), targets, Some(sender.id()), event, &payload)
    }

    /// Server-initiated room broadcast: every member of `room` receives it.
    pub async fn broadcast_room(
        &self,
        namespace: &str,
        room: &str,
        event: &str,
        payload: Payload,
    ) -> BroadcastReport {
        let targets = self.registry.resolve(namespace, Some(room)).await;
        fan_out(namespace, Some(room), targets, None, event, &payload)
    }
}

fn fan_out(
    namespace: &str,
    room: Option<&str>,
    targets: Vec<Peer>,
    exclude: Option<PeerId>,
    event: &str,
    payload: &Payload,
) -> BroadcastReport {
    let mut report = BroadcastReport::default();
    for peer in targets.iter().filter(|peer| Some(peer.id()) != exclude) {
        report.targeted += 1;
        match peer.emit(event, payload.clone()) {
            Ok(()) => report.delivered += 1,
            Err(err) => {
                report.failed += 1;
                tracing::warn!(peer_id = %peer.id(), namespace, room, event, error = %err, "broadcast delivery failed");
            }
        }
    }
    tracing::debug!(
        namespace,
        room,
        event,
        targeted = report.targeted,
        delivered = report.delivered,
        failed = report.failed,
        "broadcast"
    );
    report
}
