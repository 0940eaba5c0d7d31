//! In-process link pairs.
//!
//! Two [`Link`]s whose outbound queues feed each other's inbound queue
//! directly. Frames are moved, not serialized, but every other rule of the
//! wire (ack ids, namespace multiplexing, disconnect frames) is the same as
//! over a WebSocket.

use tokio::sync::mpsc;

use super::{Frame, Link};

/// One end of an in-process connection.
#[derive(Debug)]
pub struct MemoryEnd {
    /// Link used to open channels and send frames.
    pub link: Link,
    /// Frames arriving from the other end.
    pub inbound: mpsc::Receiver<Frame>,
}

/// Creates a connected `(client, server)` pair with the given per-direction
/// queue capacity.
///
/// Shutting one link down releases its outbound queue, which ends the other
/// end's `inbound` stream.
#[must_use]
pub fn pair(capacity: usize) -> (MemoryEnd, MemoryEnd) {
    let (to_server, server_inbound) = mpsc::channel(capacity);
    let (to_client, client_inbound) = mpsc::channel(capacity);
    let client = MemoryEnd {
        link: Link::client(to_server),
        inbound: client_inbound,
    };
    let server = MemoryEnd {
        link: Link::new(to_client),
        inbound: server_inbound,
    };
    (client, server)
}
