//! DTOs for namespace, room and peer administration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{NamespaceSummary, Payload, PeerId};
use crate::service::BroadcastReport;

/// Response body for `GET /namespaces`.
#[derive(Debug, Serialize, ToSchema)]
pub struct NamespaceListResponse {
    /// Every namespace referenced so far, sorted by name.
    pub data: Vec<NamespaceSummary>,
}

/// One connected peer.
#[derive(Debug, Serialize, ToSchema)]
pub struct PeerDto {
    /// Peer identifier.
    #[schema(value_type = String)]
    pub peer_id: PeerId,
    /// When the peer connected.
    pub connected_at: DateTime<Utc>,
    /// Rooms the peer belongs to, sorted by name.
    pub rooms: Vec<String>,
}

/// Response body for `GET /namespaces/{ns}/peers`.
#[derive(Debug, Serialize, ToSchema)]
pub struct PeerListResponse {
    /// Canonical namespace name.
    pub namespace: String,
    /// Connected peers, oldest first.
    pub data: Vec<PeerDto>,
}

/// One non-empty room.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomDto {
    /// Room name.
    pub room: String,
    /// Number of members.
    pub members: usize,
}

/// Response body for `GET /namespaces/{ns}/rooms`.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomListResponse {
    /// Canonical namespace name.
    pub namespace: String,
    /// Non-empty rooms, sorted by name.
    pub data: Vec<RoomDto>,
}

/// Response body for `GET /namespaces/{ns}/rooms/{room}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomMembersResponse {
    /// Canonical namespace name.
    pub namespace: String,
    /// Room name.
    pub room: String,
    /// Member peer IDs, sorted.
    #[schema(value_type = Vec<String>)]
    pub members: Vec<PeerId>,
}

/// Response body for administrative join and leave.
#[derive(Debug, Serialize, ToSchema)]
pub struct MembershipResponse {
    /// Canonical namespace name.
    pub namespace: String,
    /// Room name.
    pub room: String,
    /// Peer whose membership was touched.
    #[schema(value_type = String)]
    pub peer_id: PeerId,
    /// Whether membership actually changed.
    pub changed: bool,
}

/// Request body for `POST /namespaces/{ns}/broadcast`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct BroadcastRequest {
    /// Event name delivered to every target.
    pub event: String,
    /// Opaque payload.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: Payload,
    /// Restricts delivery to the members of this room.
    #[serde(default)]
    pub room: Option<String>,
}

/// Response body for `POST /namespaces/{ns}/broadcast`.
#[derive(Debug, Serialize, ToSchema)]
pub struct BroadcastResponse {
    /// Canonical namespace name.
    pub namespace: String,
    /// Room the broadcast was scoped to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    /// Event name.
    pub event: String,
    /// Delivery counts.
    pub report: BroadcastReport,
}

/// Request body for `POST /namespaces/{ns}/peers/{peer_id}/call`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CallRequest {
    /// Event name to call on the client.
    pub event: String,
    /// Opaque payload.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: Payload,
    /// Overrides the server's default call timeout.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Response body for a successful server-to-client call.
#[derive(Debug, Serialize, ToSchema)]
pub struct CallResponse {
    /// Peer that answered.
    #[schema(value_type = String)]
    pub peer_id: PeerId,
    /// Event that was called.
    pub event: String,
    /// Acknowledged value.
    #[schema(value_type = Object)]
    pub result: Payload,
}
