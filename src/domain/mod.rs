//! Domain layer: peers, namespaces and rooms.
//!
//! This module holds the server-side topology model: peer identity and
//! handles, the namespace registry that owns every connected peer, and
//! the per-namespace room membership it consults when resolving
//! broadcast targets.

pub mod namespace_registry;
pub mod peer;
pub mod peer_id;
pub mod room_registry;

pub use namespace_registry::{ConnectHandler, NamespaceRegistry, NamespaceSummary};
pub use peer::Peer;
pub use peer_id::PeerId;
pub use room_registry::RoomRegistry;

/// Opaque event payload. The core never inspects its shape.
pub type Payload = serde_json::Value;

/// Namespace every connection joins first.
pub const DEFAULT_NAMESPACE: &str = "/";

/// Normalizes a namespace name to its canonical `/`-prefixed form.
///
/// Names are otherwise opaque and case-sensitive; `chat` and `/chat` name
/// the same namespace, `/Chat` a different one. The empty string is the
/// default namespace.
#[must_use]
pub fn normalize_namespace(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_names_gain_leading_slash() {
        assert_eq!(normalize_namespace("chat"), "/chat");
        assert_eq!(normalize_namespace("/chat"), "/chat");
        assert_eq!(normalize_namespace(""), DEFAULT_NAMESPACE);
        assert_ne!(normalize_namespace("Chat"), normalize_namespace("chat"));
    }
}
