// ── Core error types ──
//
// User-facing errors from gridstudy-core. Consumers never see raw HTTP
// or JSON failures; the `From<gridstudy_api::Error>` impl translates
// transport-layer errors into domain variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to study service at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Study service request timed out")]
    Timeout,

    #[error("Notification channel closed")]
    Disconnected,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Not found: {entity_type} {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    #[error("Unexpected response from study service: {message}")]
    Decode { message: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("Study service error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<gridstudy_api::Error> for CoreError {
    fn from(err: gridstudy_api::Error) -> Self {
        match err {
            gridstudy_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            gridstudy_api::Error::Http { status: 404, message } => CoreError::NotFound {
                entity_type: "resource".into(),
                identifier: message,
            },
            gridstudy_api::Error::Http { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            gridstudy_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            gridstudy_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            gridstudy_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket connection failed: {reason}"),
            },
            gridstudy_api::Error::WebSocketClosed { code, reason } => {
                CoreError::ConnectionFailed {
                    url: String::new(),
                    reason: format!("WebSocket closed (code {code}): {reason}"),
                }
            }
            gridstudy_api::Error::Deserialization { message, body: _ } => {
                CoreError::Decode { message }
            }
        }
    }
}
