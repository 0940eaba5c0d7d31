//! Shared application state injected into all Axum handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::service::OverlayServer;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Lifecycle glue and topology.
    pub server: Arc<OverlayServer>,
    /// Outbound frame queue capacity for new WebSocket links.
    pub outbound_buffer: usize,
    /// Default timeout of server-issued calls.
    pub call_timeout: Duration,
}

impl AppState {
    /// Creates state around `server` with the documented defaults.
    #[must_use]
    pub fn new(server: Arc<OverlayServer>) -> Self {
        Self {
            server,
            outbound_buffer: 1024,
            call_timeout: Duration::from_secs(5),
        }
    }

    /// Sets the outbound queue capacity of new links.
    #[must_use]
    pub fn with_outbound_buffer(mut self, outbound_buffer: usize) -> Self {
        self.outbound_buffer = outbound_buffer.max(1);
        self
    }

    /// Sets the default timeout of server-issued calls.
    #[must_use]
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }
}
