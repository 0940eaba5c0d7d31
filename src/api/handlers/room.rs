//! Room handlers: inspection, administrative membership, broadcast.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};

use crate::api::dto::{
    BroadcastRequest, BroadcastResponse, MembershipResponse, RoomDto, RoomListResponse,
    RoomMembersResponse,
};
use crate::app_state::AppState;
use crate::domain::{PeerId, normalize_namespace};
use crate::error::{ErrorResponse, OverlayError};

/// `GET /namespaces/{ns}/rooms` — List non-empty rooms.
#[utoipa::path(
    get,
    path = "/api/v1/namespaces/{ns}/rooms",
    tag = "Rooms",
    summary = "List rooms",
    description = "Returns every room of a namespace that has at least one member.",
    params(
        ("ns" = String, Path, description = "Namespace without its leading slash"),
    ),
    responses(
        (status = 200, description = "Room list", body = RoomListResponse),
    )
)]
pub async fn list_rooms(State(state): State<AppState>, Path(ns): Path<String>) -> impl IntoResponse {
    let namespace = normalize_namespace(&ns);
    let data = state
        .server
        .registry()
        .list_rooms(&namespace)
        .await
        .into_iter()
        .map(|(room, members)| RoomDto { room, members })
        .collect();
    Json(RoomListResponse { namespace, data })
}

/// `GET /namespaces/{ns}/rooms/{room}` — List room members.
#[utoipa::path(
    get,
    path = "/api/v1/namespaces/{ns}/rooms/{room}",
    tag = "Rooms",
    summary = "List room members",
    description = "Returns the peer IDs currently in a room. An unknown room has no members.",
    params(
        ("ns" = String, Path, description = "Namespace without its leading slash"),
        ("room" = String, Path, description = "Room name"),
    ),
    responses(
        (status = 200, description = "Room members", body = RoomMembersResponse),
    )
)]
pub async fn room_members(
    State(state): State<AppState>,
    Path((ns, room)): Path<(String, String)>,
) -> impl IntoResponse {
    let namespace = normalize_namespace(&ns);
    let mut members: Vec<PeerId> = state
        .server
        .registry()
        .room_members(&namespace, &room)
        .await
        .iter()
        .map(|peer| peer.id())
        .collect();
    members.sort();
    Json(RoomMembersResponse {
        namespace,
        room,
        members,
    })
}

/// `PUT /namespaces/{ns}/rooms/{room}/peers/{peer_id}` — Add a peer to a room.
///
/// # Errors
///
/// Returns [`OverlayError::PeerNotFound`] if the peer is not connected.
#[utoipa::path(
    put,
    path = "/api/v1/namespaces/{ns}/rooms/{room}/peers/{peer_id}",
    tag = "Rooms",
    summary = "Join a peer to a room",
    description = "Idempotent. `changed` is false when the peer was already a member.",
    params(
        ("ns" = String, Path, description = "Namespace without its leading slash"),
        ("room" = String, Path, description = "Room name"),
        ("peer_id" = uuid::Uuid, Path, description = "Peer UUID"),
    ),
    responses(
        (status = 200, description = "Membership updated", body = MembershipResponse),
        (status = 404, description = "Peer not found", body = ErrorResponse),
    )
)]
pub async fn join_room(
    State(state): State<AppState>,
    Path((ns, room, peer_id)): Path<(String, String, PeerId)>,
) -> Result<impl IntoResponse, OverlayError> {
    let namespace = normalize_namespace(&ns);
    let changed = state.server.join(&namespace, &room, peer_id).await?;
    Ok(Json(MembershipResponse {
        namespace,
        room,
        peer_id,
        changed,
    }))
}

/// `DELETE /namespaces/{ns}/rooms/{room}/peers/{peer_id}` — Remove a peer
/// from a room.
///
/// # Errors
///
/// Returns [`OverlayError::PeerNotFound`] if the peer is not connected.
#[utoipa::path(
    delete,
    path = "/api/v1/namespaces/{ns}/rooms/{room}/peers/{peer_id}",
    tag = "Rooms",
    summary = "Remove a peer from a room",
    description = "Idempotent. `changed` is false when the peer was not a member.",
    params(
        ("ns" = String, Path, description = "Namespace without its leading slash"),
        ("room" = String, Path, description = "Room name"),
        ("peer_id" = uuid::Uuid, Path, description = "Peer UUID"),
    ),
    responses(
        (status = 200, description = "Membership updated", body = MembershipResponse),
        (status = 404, description = "Peer not found", body = ErrorResponse),
    )
)]
pub async fn leave_room(
    State(state): State<AppState>,
    Path((ns, room, peer_id)): Path<(String, String, PeerId)>,
) -> Result<impl IntoResponse, OverlayError> {
    let namespace = normalize_namespace(&ns);
    let changed = state.server.leave(&namespace, &room, peer_id).await?;
    Ok(Json(MembershipResponse {
        namespace,
        room,
        peer_id,
        changed,
    }))
}

/// `POST /namespaces/{ns}/broadcast` — Server-initiated broadcast.
///
/// # Errors
///
/// Returns [`OverlayError::InvalidRequest`] on an empty event name.
#[utoipa::path(
    post,
    path = "/api/v1/namespaces/{ns}/broadcast",
    tag = "Rooms",
    summary = "Broadcast an event",
    description = "Delivers an event to every peer of the namespace, or of one room when `room` is set. Per-peer failures are counted, never fatal.",
    params(
        ("ns" = String, Path, description = "Namespace without its leading slash"),
    ),
    request_body = BroadcastRequest,
    responses(
        (status = 200, description = "Delivery report", body = BroadcastResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
    )
)]
pub async fn broadcast(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    Json(req): Json<BroadcastRequest>,
) -> Result<impl IntoResponse, OverlayError> {
    if req.event.is_empty() {
        return Err(OverlayError::InvalidRequest("event must not be empty".to_string()));
    }
    let namespace = normalize_namespace(&ns);
    let report = match &req.room {
        Some(room) => {
            state
                .server
                .broadcast_room(&namespace, room, &req.event, req.payload)
                .await
        }
        None => state.server.broadcast(&namespace, &req.event, req.payload).await,
    };
    Ok(Json(BroadcastResponse {
        namespace,
        room: req.room,
        event: req.event,
        report,
    }))
}

/// Room and broadcast routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/namespaces/{ns}/rooms", get(list_rooms))
        .route("/namespaces/{ns}/rooms/{room}", get(room_members))
        .route(
            "/namespaces/{ns}/rooms/{room}/peers/{peer_id}",
            put(join_room).delete(leave_room),
        )
        .route("/namespaces/{ns}/broadcast", post(broadcast))
}
