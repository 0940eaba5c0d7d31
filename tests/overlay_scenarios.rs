//! End-to-end overlay behavior over in-process links.
//!
//! Every client here is a real [`roomwire::client`] connection to a real
//! [`OverlayServer`]; only the socket is replaced by a memory pair.

#![allow(clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use roomwire::client::{self, ClientOptions};
use roomwire::domain::{Payload, Peer};
use roomwire::error::OverlayError;
use roomwire::service::OverlayServer;
use roomwire::transport::memory;

const SETTLE: Duration = Duration::from_millis(100);

async fn connect(server: &OverlayServer, namespace: &str) -> Peer {
    let (end, remote) = memory::pair(128);
    let serving = server.clone();
    tokio::spawn(async move { serving.serve_link(remote.link, remote.inbound).await });
    let Ok(root) = client::attach(end, &ClientOptions::default(), |_| {}).await else {
        panic!("attach failed");
    };
    if namespace == "/" {
        return root;
    }
    let Ok(peer) = client::join_namespace(&root, namespace, |_| {}).await else {
        panic!("join_namespace failed");
    };
    peer
}

fn inbox(peer: &Peer, event: &str) -> mpsc::UnboundedReceiver<Payload> {
    let (tx, rx) = mpsc::unbounded_channel();
    peer.on(event, move |payload| {
        let _ = tx.send(payload);
        async { Ok(()) }
    });
    rx
}

async fn server_peer(server: &OverlayServer, client: &Peer) -> Peer {
    let Ok(peer) = server.peer(client.namespace(), client.id()).await else {
        panic!("server has no peer {}", client.id());
    };
    peer
}

/// Waits until the server no longer knows `client`.
async fn removed(server: &OverlayServer, client: &Peer) {
    for _ in 0..200 {
        if server.peer(client.namespace(), client.id()).await.is_err() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("peer {} was never removed", client.id());
}

#[tokio::test]
async fn ping_call_between_room_members_resolves_with_reply() {
    let server = OverlayServer::default();
    let a = connect(&server, "/chat").await;
    let b = connect(&server, "/chat").await;
    let (a_srv, b_srv) = (server_peer(&server, &a).await, server_peer(&server, &b).await);
    server.registry().join(&a_srv, "lobby").await;
    server.registry().join(&b_srv, "lobby").await;

    b.on_call("ping", |payload| async move {
        let n = payload.get("n").and_then(Payload::as_i64).unwrap_or(0);
        Ok(json!({"n": n + 1}))
    });

    // A reaches B through the server peer of B, the server relaying the call.
    let relay = b_srv.clone();
    a_srv.on_call("ping", move |payload| {
        let relay = relay.clone();
        async move { relay.call("ping", payload, Duration::from_millis(400)).await }
    });

    let result = a.call("ping", json!({"n": 1}), Duration::from_millis(500)).await;
    assert_eq!(result, Ok(json!({"n": 2})));
}

#[tokio::test]
async fn room_broadcast_skips_sender() {
    let server = OverlayServer::default();
    let a = connect(&server, "/chat").await;
    let b = connect(&server, "/chat").await;
    let mut a_msgs = inbox(&a, "msg");
    let mut b_msgs = inbox(&b, "msg");
    let (a_srv, b_srv) = (server_peer(&server, &a).await, server_peer(&server, &b).await);
    server.registry().join(&a_srv, "lobby").await;
    server.registry().join(&b_srv, "lobby").await;

    let report = server
        .router()
        .broadcast_to_room(&a_srv, "lobby", "msg", json!("hi"))
        .await;
    assert_eq!(report.delivered, 1);
    assert_eq!(b_msgs.recv().await, Some(json!("hi")));
    tokio::time::sleep(SETTLE).await;
    assert!(a_msgs.try_recv().is_err());
}

#[tokio::test]
async fn namespace_broadcast_includes_sender_but_except_sender_does_not() {
    let server = OverlayServer::default();
    let a = connect(&server, "/chat").await;
    let b = connect(&server, "/chat").await;
    let mut a_news = inbox(&a, "news");
    let mut b_news = inbox(&b, "news");
    let a_srv = server_peer(&server, &a).await;

    server.broadcast("/chat", "news", json!(1)).await;
    assert_eq!(a_news.recv().await, Some(json!(1)));
    assert_eq!(b_news.recv().await, Some(json!(1)));

    server
        .router()
        .broadcast_except_sender(&a_srv, "news", json!(2))
        .await;
    assert_eq!(b_news.recv().await, Some(json!(2)));
    tokio::time::sleep(SETTLE).await;
    assert!(a_news.try_recv().is_err());
}

#[tokio::test]
async fn namespaces_do_not_leak_into_each_other() {
    let server = OverlayServer::default();
    let chat = connect(&server, "/chat").await;
    let other = connect(&server, "/other").await;
    let mut chat_news = inbox(&chat, "news");
    let mut other_news = inbox(&other, "news");

    server.broadcast("/other", "news", json!("o")).await;
    assert_eq!(other_news.recv().await, Some(json!("o")));
    tokio::time::sleep(SETTLE).await;
    assert!(chat_news.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn call_to_unregistered_handler_times_out_not_earlier() {
    let server = OverlayServer::default();
    let peer = connect(&server, "/").await;
    let started = tokio::time::Instant::now();
    let result = peer.call("sum", json!([1, 2]), Duration::from_millis(200)).await;
    assert_eq!(
        result,
        Err(OverlayError::Timeout {
            event: "sum".to_string(),
            timeout_ms: 200,
        })
    );
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(peer.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn late_acknowledgement_has_no_effect() {
    let server = OverlayServer::default();
    let answered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&answered);
    server
        .on_connect("/", move |peer| {
            let counter = Arc::clone(&counter);
            async move {
                peer.on_call("slow", move |_| {
                    let counter = Arc::clone(&counter);
                    async move {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(json!("late"))
                    }
                });
            }
        })
        .await;
    let peer = connect(&server, "/").await;

    let result = peer.call("slow", Payload::Null, Duration::from_millis(100)).await;
    assert!(matches!(result, Err(OverlayError::Timeout { .. })));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(answered.load(Ordering::SeqCst), 1);
    assert!(peer.calls().is_empty());
    assert!(peer.is_connected());
}

#[tokio::test]
async fn disconnect_during_call_is_transport_error() {
    let server = OverlayServer::default();
    server
        .on_connect("/", |peer| async move {
            let me = peer.clone();
            peer.on_call("hang", move |_| {
                let me = me.clone();
                async move {
                    me.disconnect();
                    Ok(json!("too late"))
                }
            });
        })
        .await;
    let peer = connect(&server, "/").await;

    let result = peer.call("hang", Payload::Null, Duration::from_secs(10)).await;
    assert!(matches!(result, Err(OverlayError::TransportError(_))));
}

#[tokio::test]
async fn remote_handler_error_marker_propagates_verbatim() {
    let server = OverlayServer::default();
    server
        .on_connect("/", |peer| async move {
            peer.on_call("div", |_| async {
                Err(OverlayError::HandlerError(json!({"reason": "divide by zero"})))
            });
        })
        .await;
    let peer = connect(&server, "/").await;
    let result = peer.call("div", json!([1, 0]), Duration::from_secs(1)).await;
    assert_eq!(
        result,
        Err(OverlayError::HandlerError(json!({"reason": "divide by zero"})))
    );
}

#[tokio::test]
async fn disconnected_peer_leaves_every_room_and_gets_no_broadcasts() {
    let server = OverlayServer::default();
    let a = connect(&server, "/chat").await;
    let b = connect(&server, "/chat").await;
    let a_srv = server_peer(&server, &a).await;
    let b_srv = server_peer(&server, &b).await;
    for room in ["lobby", "games"] {
        server.registry().join(&a_srv, room).await;
    }
    server.registry().join(&b_srv, "lobby").await;

    let notified = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notified);
    a_srv.on_disconnect(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    client::disconnect(&a);
    removed(&server, &a).await;

    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert!(server.registry().rooms_of(&a_srv).await.is_empty());
    assert_eq!(server.registry().room_members("/chat", "lobby").await, vec![b_srv.clone()]);
    assert!(server.registry().room_members("/chat", "games").await.is_empty());

    let report = server.broadcast("/chat", "news", Payload::Null).await;
    assert_eq!(report.targeted, 1);
    let report = server.broadcast_room("/chat", "games", "news", Payload::Null).await;
    assert_eq!(report.targeted, 0);
}

#[tokio::test]
async fn handler_failure_does_not_stop_later_handlers() {
    let server = OverlayServer::default();
    let peer = connect(&server, "/").await;
    let ran = Arc::new(AtomicUsize::new(0));
    peer.on("tick", |_| async { Err(OverlayError::Internal("first fails".to_string())) });
    peer.on("tick", |_| async {
        let fail = true;
        if fail {
            panic!("second panics");
        }
        Ok(())
    });
    let counter = Arc::clone(&ran);
    peer.on("tick", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    });
    let mut ticks = inbox(&peer, "tick");

    server.broadcast("/", "tick", Payload::Null).await;
    server.broadcast("/", "tick", Payload::Null).await;
    assert!(ticks.recv().await.is_some());
    assert!(ticks.recv().await.is_some());
    assert_eq!(ran.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn events_from_one_sender_arrive_in_order() {
    let server = OverlayServer::default();
    let receiver = connect(&server, "/").await;
    let mut seq = inbox(&receiver, "seq");
    let srv = server_peer(&server, &receiver).await;
    for n in 0..50 {
        tokio_test::assert_ok!(srv.emit("seq", json!(n)));
    }
    for n in 0..50 {
        assert_eq!(seq.recv().await, Some(json!(n)));
    }
}

#[tokio::test]
async fn only_first_call_handler_answers() {
    let server = OverlayServer::default();
    let second_ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&second_ran);
    server
        .on_connect("/", move |peer| {
            let counter = Arc::clone(&counter);
            async move {
                peer.on_call("who", |_| async { Ok(json!("first")) });
                peer.on_call("who", move |_| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(json!("second"))
                    }
                });
            }
        })
        .await;
    let peer = connect(&server, "/").await;
    let result = peer.call("who", Payload::Null, Duration::from_secs(1)).await;
    assert_eq!(result, Ok(json!("first")));
    assert_eq!(second_ran.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reconnecting_a_namespace_replaces_the_old_peer() {
    let server = OverlayServer::default();
    let root = connect(&server, "/").await;
    let Ok(first) = client::join_namespace(&root, "/chat", |_| {}).await else {
        panic!("first join failed");
    };
    let Ok(second) = client::join_namespace(&root, "/chat", |_| {}).await else {
        panic!("second join failed");
    };
    assert_ne!(first.id(), second.id());
    removed(&server, &first).await;
    tokio_test::assert_ok!(server.peer("/chat", second.id()).await);
    assert_eq!(server.list_peers("/chat").await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn events_sent_on_accept_reach_handlers_registered_in_setup() {
    let server = OverlayServer::default();
    server
        .on_connect("/chat", |peer| async move {
            let _ = peer.emit("welcome", json!("hello"));
        })
        .await;

    for _ in 0..20 {
        let root = connect(&server, "/").await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let Ok(chat) = client::join_namespace(&root, "/chat", move |peer| {
            peer.on("welcome", move |payload| {
                let _ = tx.send(payload);
                async { Ok(()) }
            });
        })
        .await
        else {
            panic!("join_namespace failed");
        };
        let Ok(Some(welcome)) = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await else {
            panic!("welcome for {} was lost", chat.id());
        };
        assert_eq!(welcome, json!("hello"));
        client::disconnect(&chat);
        client::disconnect(&root);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_handler_does_not_delay_a_later_call() {
    let server = OverlayServer::default();
    server
        .on_connect("/", |peer| async move {
            peer.on("slow", |_| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            });
            peer.on_call("ping", |_| async { Ok(json!("pong")) });
        })
        .await;
    let peer = connect(&server, "/").await;

    tokio_test::assert_ok!(peer.emit("slow", Payload::Null));
    let result = peer.call("ping", Payload::Null, Duration::from_millis(200)).await;
    assert_eq!(result, Ok(json!("pong")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nested_calls_between_two_ends_complete() {
    let server = OverlayServer::default();
    server
        .on_connect("/", |peer| async move {
            let me = peer.clone();
            peer.on_call("lookup", move |_| {
                let me = me.clone();
                async move { me.call("confirm", Payload::Null, Duration::from_millis(500)).await }
            });
        })
        .await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (end, remote) = memory::pair(128);
    let serving = server.clone();
    tokio::spawn(async move { serving.serve_link(remote.link, remote.inbound).await });
    let Ok(peer) = client::attach(end, &ClientOptions::default(), move |peer| {
        let me = peer.clone();
        peer.on_call("ask", move |_| {
            let me = me.clone();
            async move { me.call("lookup", Payload::Null, Duration::from_millis(800)).await }
        });
        peer.on_call("confirm", move |_| {
            let _ = tx.send(());
            async { Ok(json!("confirmed")) }
        });
    })
    .await
    else {
        panic!("attach failed");
    };

    let answer = server
        .call("/", peer.id(), "ask", Payload::Null, Duration::from_secs(1))
        .await;
    assert_eq!(answer, Ok(json!("confirmed")));
    assert_eq!(rx.recv().await, Some(()));
}
