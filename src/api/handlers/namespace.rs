//! Namespace and peer handlers: list, kick, server-to-client call.
//!
//! The `{ns}` path segment carries the namespace without its leading
//! slash; the default namespace is addressed as `%2F`.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use crate::api::dto::{
    CallRequest, CallResponse, NamespaceListResponse, PeerDto, PeerListResponse,
};
use crate::app_state::AppState;
use crate::domain::{PeerId, normalize_namespace};
use crate::error::{ErrorResponse, OverlayError};

/// `GET /namespaces` — List namespaces.
#[utoipa::path(
    get,
    path = "/api/v1/namespaces",
    tag = "Namespaces",
    summary = "List namespaces",
    description = "Returns every namespace referenced so far with its peer and room counts.",
    responses(
        (status = 200, description = "Namespace list", body = NamespaceListResponse),
    )
)]
pub async fn list_namespaces(State(state): State<AppState>) -> impl IntoResponse {
    Json(NamespaceListResponse {
        data: state.server.list_namespaces().await,
    })
}

/// `GET /namespaces/{ns}/peers` — List connected peers.
#[utoipa::path(
    get,
    path = "/api/v1/namespaces/{ns}/peers",
    tag = "Namespaces",
    summary = "List peers",
    description = "Returns the peers connected to a namespace, oldest first, with their rooms.",
    params(
        ("ns" = String, Path, description = "Namespace without its leading slash"),
    ),
    responses(
        (status = 200, description = "Peer list", body = PeerListResponse),
    )
)]
pub async fn list_peers(State(state): State<AppState>, Path(ns): Path<String>) -> impl IntoResponse {
    let namespace = normalize_namespace(&ns);
    let registry = state.server.registry();
    let mut data = Vec::new();
    for peer in state.server.list_peers(&namespace).await {
        data.push(PeerDto {
            peer_id: peer.id(),
            connected_at: peer.connected_at(),
            rooms: registry.rooms_of(&peer).await,
        });
    }
    Json(PeerListResponse { namespace, data })
}

/// `DELETE /namespaces/{ns}/peers/{peer_id}` — Disconnect a peer.
///
/// # Errors
///
/// Returns [`OverlayError::PeerNotFound`] if the peer is not connected.
#[utoipa::path(
    delete,
    path = "/api/v1/namespaces/{ns}/peers/{peer_id}",
    tag = "Namespaces",
    summary = "Kick a peer",
    description = "Closes the peer's logical connection from the server side and removes it from every room.",
    params(
        ("ns" = String, Path, description = "Namespace without its leading slash"),
        ("peer_id" = uuid::Uuid, Path, description = "Peer UUID"),
    ),
    responses(
        (status = 204, description = "Peer disconnected"),
        (status = 404, description = "Peer not found", body = ErrorResponse),
    )
)]
pub async fn kick_peer(
    State(state): State<AppState>,
    Path((ns, peer_id)): Path<(String, PeerId)>,
) -> Result<impl IntoResponse, OverlayError> {
    state.server.kick(&normalize_namespace(&ns), peer_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /namespaces/{ns}/peers/{peer_id}/call` — Call an event on a client.
///
/// # Errors
///
/// Returns [`OverlayError::InvalidRequest`] on an empty event name,
/// [`OverlayError::PeerNotFound`] for an unknown peer, and the call's own
/// failure otherwise.
#[utoipa::path(
    post,
    path = "/api/v1/namespaces/{ns}/peers/{peer_id}/call",
    tag = "Namespaces",
    summary = "Call a client",
    description = "Emits an event to one peer and waits for its acknowledgement.",
    params(
        ("ns" = String, Path, description = "Namespace without its leading slash"),
        ("peer_id" = uuid::Uuid, Path, description = "Peer UUID"),
    ),
    request_body = CallRequest,
    responses(
        (status = 200, description = "Acknowledged value", body = CallResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 404, description = "Peer not found", body = ErrorResponse),
        (status = 422, description = "Client handler failed", body = ErrorResponse),
        (status = 502, description = "Connection lost before acknowledgement", body = ErrorResponse),
        (status = 504, description = "No acknowledgement in time", body = ErrorResponse),
    )
)]
pub async fn call_peer(
    State(state): State<AppState>,
    Path((ns, peer_id)): Path<(String, PeerId)>,
    Json(req): Json<CallRequest>,
) -> Result<impl IntoResponse, OverlayError> {
    if req.event.is_empty() {
        return Err(OverlayError::InvalidRequest("event must not be empty".to_string()));
    }
    let timeout = req
        .timeout_ms
        .map_or(state.call_timeout, Duration::from_millis);
    let result = state
        .server
        .call(&normalize_namespace(&ns), peer_id, &req.event, req.payload, timeout)
        .await?;
    Ok(Json(CallResponse {
        peer_id,
        event: req.event,
        result,
    }))
}

/// Namespace and peer routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/namespaces", get(list_namespaces))
        .route("/namespaces/{ns}/peers", get(list_peers))
        .route("/namespaces/{ns}/peers/{peer_id}", delete(kick_peer))
        .route("/namespaces/{ns}/peers/{peer_id}/call", post(call_peer))
}
