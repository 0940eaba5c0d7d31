//! Service layer: connection lifecycle and broadcast orchestration.
//!
//! [`OverlayServer`] turns physical links into registered peers and owns
//! the administrative operations. [`BroadcastRouter`] resolves broadcast
//! selectors against the [`crate::domain::NamespaceRegistry`].

pub mod broadcast_router;
pub mod overlay_server;

pub use broadcast_router::{BroadcastReport, BroadcastRouter};
pub use overlay_server::OverlayServer;
