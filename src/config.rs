//! Server configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`).

use std::net::SocketAddr;
use std::time::Duration;

/// Log output format of the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-field lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Top-level server configuration.
///
/// Loaded once at startup via [`OverlayConfig::from_env`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Socket address to bind the HTTP/WebSocket server to.
    pub listen_addr: SocketAddr,

    /// Default timeout of server-issued calls.
    pub call_timeout: Duration,

    /// Outbound frame queue capacity of each link.
    pub outbound_buffer: usize,

    /// Timeout applied to REST requests.
    pub http_request_timeout: Duration,

    /// Log output format.
    pub log_format: LogFormat,

    /// Whether the reference chat namespace is installed.
    pub chat_enabled: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            call_timeout: Duration::from_millis(5000),
            outbound_buffer: 1024,
            http_request_timeout: Duration::from_secs(30),
            log_format: LogFormat::Pretty,
            chat_enabled: true,
        }
    }
}

impl OverlayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is not set or invalid.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> Result<Self, std::net::AddrParseError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let listen_addr = match std::env::var("LISTEN_ADDR") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.listen_addr,
        };

        let log_format = match std::env::var("LOG_FORMAT").ok().as_deref() {
            Some("json") | Some("JSON") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            listen_addr,
            call_timeout: Duration::from_millis(parse_env("CALL_TIMEOUT_MS", 5000)),
            // A zero-capacity queue would panic in tokio's mpsc.
            outbound_buffer: parse_env("OUTBOUND_BUFFER", defaults.outbound_buffer).max(1),
            http_request_timeout: Duration::from_secs(parse_env("HTTP_REQUEST_TIMEOUT_SECS", 30)),
            log_format,
            chat_enabled: parse_env_bool("CHAT_ENABLED", defaults.chat_enabled),
        })
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().map(|v| v.to_ascii_lowercase()).as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        _ => default,
    }
}
