//! Reference chat application on the `/chat` namespace.
//!
//! | Event      | Kind | Effect |
//! |------------|------|--------|
//! | `join`     | call | joins `room`; other members get `joined` |
//! | `leave`    | call | leaves `room` |
//! | `msg`      | emit | to `room` or the whole namespace, sender excluded |
//! | `announce` | emit | to the whole namespace, sender included |
//! | `ping`     | call | answers `{n: n + 1}` |

use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::domain::{NamespaceRegistry, Payload, Peer};
use crate::error::OverlayError;
use crate::service::{BroadcastRouter, OverlayServer};

/// Namespace the chat application lives in.
pub const CHAT_NAMESPACE: &str = "/chat";

#[derive(Debug, Deserialize)]
struct RoomRequest {
    room: String,
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    #[serde(default)]
    room: Option<String>,
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnnounceRequest {
    text: String,
}

#[derive(Debug, Deserialize)]
struct PingRequest {
    #[serde(default)]
    n: i64,
}

/// Registers the chat handlers for every peer entering [`CHAT_NAMESPACE`].
pub async fn install(server: &OverlayServer) {
    let registry = Arc::clone(server.registry());
    let router = server.router().clone();
    server
        .on_connect(CHAT_NAMESPACE, move |peer| {
            wire_peer(&peer, &registry, &router);
            async {}
        })
        .await;
    tracing::info!(namespace = CHAT_NAMESPACE, "chat application installed");
}

fn parse<T: DeserializeOwned>(payload: Payload) -> Result<T, OverlayError> {
    serde_json::from_value(payload).map_err(|err| OverlayError::InvalidRequest(err.to_string()))
}

// Handlers hold a clone of their own peer; teardown unregisters them,
// which releases it.
fn wire_peer(peer: &Peer, registry: &Arc<NamespaceRegistry>, router: &BroadcastRouter) {
    {
        let (me, registry, router) = (peer.clone(), Arc::clone(registry), router.clone());
        peer.on_call("join", move |payload| {
            let (me, registry, router) = (me.clone(), Arc::clone(&registry), router.clone());
            async move {
                let RoomRequest { room } = parse(payload)?;
                if registry.join(&me, &room).await {
                    let notice = json!({"peer_id": me.id(), "room": room});
                    router.broadcast_to_room(&me, &room, "joined", notice).await;
                }
                let mut members: Vec<String> = registry
                    .room_members(me.namespace(), &room)
                    .await
                    .iter()
                    .map(|peer| peer.id().to_string())
                    .collect();
                members.sort();
                Ok(json!({"room": room, "members": members}))
            }
        });
    }

    {
        let (me, registry) = (peer.clone(), Arc::clone(registry));
        peer.on_call("leave", move |payload| {
            let (me, registry) = (me.clone(), Arc::clone(&registry));
            async move {
                let RoomRequest { room } = parse(payload)?;
                let left = registry.leave(&me, &room).await;
                Ok(json!({"room": room, "left": left}))
            }
        });
    }

    {
        let (me, router) = (peer.clone(), router.clone());
        peer.on("msg", move |payload| {
            let (me, router) = (me.clone(), router.clone());
            async move {
                let MessageRequest { room, text } = parse(payload)?;
                match room {
                    Some(room) => {
                        let out = json!({"from": me.id(), "text": text, "room": room});
                        router.broadcast_to_room(&me, &room, "msg", out).await;
                    }
                    None => {
                        let out = json!({"from": me.id(), "text": text});
                        router.broadcast_except_sender(&me, "msg", out).await;
                    }
                }
                Ok(())
            }
        });
    }

    {
        let (me, router) = (peer.clone(), router.clone());
        peer.on("announce", move |payload| {
            let (me, router) = (me.clone(), router.clone());
            async move {
                let AnnounceRequest { text } = parse(payload)?;
                let out = json!({"from": me.id(), "text": text});
                router.broadcast(me.namespace(), "announcement", out).await;
                Ok(())
            }
        });
    }

    peer.on_call("ping", |payload| async move {
        let PingRequest { n } = parse(payload)?;
        Ok(json!({"n": n.saturating_add(1)}))
    });
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::client::{self, ClientOptions};
    use crate::transport::memory;

    const WAIT: Duration = Duration::from_secs(1);

    async fn chat_peer(server: &OverlayServer) -> Peer {
        let (end, remote) = memory::pair(64);
        let serving = server.clone();
        tokio::spawn(async move { serving.serve_link(remote.link, remote.inbound).await });
        let Ok(root) = client::attach(end, &ClientOptions::default(), |_| {}).await else {
            panic!("attach failed");
        };
        let Ok(chat) = client::join_namespace(&root, "chat", |_| {}).await else {
            panic!("join failed");
        };
        chat
    }

    #[tokio::test]
    async fn ping_increments() {
        let server = OverlayServer::default();
        install(&server).await;
        let peer = chat_peer(&server).await;
        assert_eq!(peer.call("ping", json!({"n": 1}), WAIT).await, Ok(json!({"n": 2})));
    }

    #[tokio::test]
    async fn join_reports_members_and_notifies_others() {
        let server = OverlayServer::default();
        install(&server).await;
        let a = chat_peer(&server).await;
        let b = chat_peer(&server).await;

        let (tx, mut joined) = tokio::sync::mpsc::unbounded_channel();
        a.on("joined", move |payload| {
            let _ = tx.send(payload);
            async { Ok(()) }
        });

        tokio_test::assert_ok!(a.call("join", json!({"room": "lobby"}), WAIT).await);
        let Ok(reply) = b.call("join", json!({"room": "lobby"}), WAIT).await else {
            panic!("join failed");
        };
        let Some(members) = reply.get("members").and_then(Payload::as_array) else {
            panic!("members missing");
        };
        assert_eq!(members.len(), 2);

        let Some(notice) = joined.recv().await else {
            panic!("expected joined notice");
        };
        assert_eq!(notice, json!({"peer_id": b.id(), "room": "lobby"}));
    }

    #[tokio::test]
    async fn bad_payload_is_handler_error() {
        let server = OverlayServer::default();
        install(&server).await;
        let peer = chat_peer(&server).await;
        let result = peer.call("join", json!({"wrong": true}), WAIT).await;
        assert!(matches!(result, Err(OverlayError::HandlerError(Payload::String(_)))));
    }
}
