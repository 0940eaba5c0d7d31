//! # roomwire
//!
//! Real-time pub/sub overlay: clients hold persistent WebSocket
//! connections to a server, partitioned into isolated **namespaces** and,
//! within a namespace, into **rooms**. On top of one-way events the crate
//! offers selective broadcast and acknowledged request/response calls
//! with timeout and failure semantics.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket, in-process)
//!     │
//!     ├── WS Handler (ws/)          client (client/)
//!     │        └──── Link / Channel (transport/) ────┘
//!     │
//!     ├── OverlayServer, BroadcastRouter (service/)
//!     │
//!     ├── NamespaceRegistry, RoomRegistry, Peer (domain/)
//!     │
//!     ├── EventDispatcher (dispatch/)
//!     └── Call/Ack Engine (call/)
//!
//! REST admin API (api/) ── OverlayServer
//! ```
//!
//! The core only consumes the [`transport::Transport`] capability. The
//! bundled implementation multiplexes every namespace a client joins over
//! one physical link.

pub mod api;
pub mod app_state;
pub mod call;
pub mod chat;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod service;
pub mod transport;
pub mod ws;
