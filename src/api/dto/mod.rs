//! Data Transfer Objects for REST request/response serialization.
//!
//! Peer IDs travel as UUID strings and payloads as arbitrary JSON.

pub mod namespace_dto;

pub use namespace_dto::*;
