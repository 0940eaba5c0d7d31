//! WebSocket layer: the physical transport of the overlay.
//!
//! The endpoint at `/ws` carries JSON [`crate::transport::Frame`]s. One
//! socket is one [`crate::transport::Link`]; every namespace the client
//! joins is a logical channel multiplexed over it.

pub mod connection;
pub mod handler;
