//! Overlay error types with HTTP status code mapping.
//!
//! [`OverlayError`] is the central error type for the overlay. The first
//! three variants form the failure taxonomy of a `call`; the rest surface
//! through the REST admin API. Each variant maps to a numeric code and an
//! HTTP status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{Payload, PeerId};

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "peer not found: 0b6f...",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details (the remote error marker for handler failures).
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<Payload>,
}

/// Overlay error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                   |
/// |-----------|-----------------|-------------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request               |
/// | 2000–2999 | Not Found       | 404 Not Found                 |
/// | 3000–3999 | Server          | 500 Internal Server Error     |
/// | 5000–5999 | Call outcome    | 504 / 502 / 422               |
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OverlayError {
    /// No acknowledgement arrived within the call's deadline.
    #[error("call `{event}` timed out after {timeout_ms} ms")]
    Timeout {
        /// Event name of the call.
        event: String,
        /// Deadline that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// Connection-level failure: closed channel, dropped link, full
    /// outbound queue, or disconnect while a call was pending.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The remote handler failed; carries the remote error marker verbatim.
    #[error("remote handler failed: {0}")]
    HandlerError(Payload),

    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No peer with the given ID is connected to the namespace.
    #[error("peer not found: {0}")]
    PeerNotFound(PeerId),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl OverlayError {
    /// Shorthand for a [`OverlayError::HandlerError`] carrying a string marker.
    #[must_use]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::HandlerError(Payload::String(message.into()))
    }

    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::PeerNotFound(_) => 2001,
            Self::Internal(_) => 3000,
            Self::Timeout { .. } => 5001,
            Self::TransportError(_) => 5002,
            Self::HandlerError(_) => 5003,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::PeerNotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::TransportError(_) => StatusCode::BAD_GATEWAY,
            Self::HandlerError(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    /// Returns the error marker to attach to an acknowledgement when this
    /// error is the result of a call handler.
    #[must_use]
    pub fn ack_marker(&self) -> Payload {
        match self {
            Self::HandlerError(marker) => marker.clone(),
            other => Payload::String(other.to_string()),
        }
    }
}

impl IntoResponse for OverlayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let details = match &self {
            Self::HandlerError(marker) => Some(marker.clone()),
            _ => None,
        };
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
