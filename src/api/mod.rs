//! REST API layer: route handlers, DTOs, and router composition.
//!
//! Administrative endpoints are mounted under `/api/v1`; `/health` sits at
//! the root.

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document of the REST surface.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "roomwire", description = "Administrative API of the roomwire overlay server"),
    paths(
        handlers::system::health_handler,
        handlers::namespace::list_namespaces,
        handlers::namespace::list_peers,
        handlers::namespace::kick_peer,
        handlers::namespace::call_peer,
        handlers::room::list_rooms,
        handlers::room::room_members,
        handlers::room::join_room,
        handlers::room::leave_room,
        handlers::room::broadcast,
    ),
    tags(
        (name = "System", description = "Service health"),
        (name = "Namespaces", description = "Namespaces and connected peers"),
        (name = "Rooms", description = "Room membership and broadcast"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
}
