//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use gridstudy_config::ConfigError;
use gridstudy_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to study service at {url}: {reason}")]
    #[diagnostic(
        code(gridstudy::connection_failed),
        help(
            "Check that the study service is running and accessible.\n\
             URL: {url}\n\
             Try: gridstudy tree --insecure"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Lost the study service connection")]
    #[diagnostic(code(gridstudy::disconnected))]
    Disconnected,

    // ── Authentication ───────────────────────────────────────────────
    #[error("Study service rejected the request ({status})")]
    #[diagnostic(
        code(gridstudy::auth_failed),
        help(
            "Verify the bearer token.\n\
             Run: gridstudy config set-token <TOKEN>\n\
             Or set the GRIDSTUDY_TOKEN environment variable."
        )
    )]
    AuthFailed { status: u16 },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(gridstudy::not_found),
        help("Run: gridstudy {list_command} to see what is available")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── API ──────────────────────────────────────────────────────────
    #[error("Study service error: {message}")]
    #[diagnostic(code(gridstudy::api_error))]
    ApiError { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(gridstudy::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(gridstudy::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: gridstudy config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No study configured")]
    #[diagnostic(
        code(gridstudy::no_config),
        help(
            "Create a profile with: gridstudy config init\n\
             Or pass --server, --study and --root-network.\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(gridstudy::config))]
    Config(#[from] ConfigError),

    #[error("Keyring access failed: {reason}")]
    #[diagnostic(code(gridstudy::keyring))]
    Keyring { reason: String },

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Request timed out")]
    #[diagnostic(
        code(gridstudy::timeout),
        help("Increase timeout with --timeout or check study service responsiveness.")
    )]
    Timeout,

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {0}")]
    #[diagnostic(code(gridstudy::render))]
    Render(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Disconnected => exit_code::CONNECTION,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::NotFound { .. }
            | Self::ProfileNotFound { .. }
            | Self::Config(ConfigError::UnknownProfile { .. }) => exit_code::NOT_FOUND,
            Self::Timeout => exit_code::TIMEOUT,
            Self::Validation { .. }
            | Self::NoConfig { .. }
            | Self::Config(ConfigError::Validation { .. }) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed { url, reason },
            CoreError::Timeout => CliError::Timeout,
            CoreError::Disconnected => CliError::Disconnected,
            CoreError::NotFound {
                entity_type,
                identifier,
            } => CliError::NotFound {
                list_command: if entity_type == "alias" { "aliases" } else { "tree" }.into(),
                resource_type: entity_type,
                identifier,
            },
            CoreError::Api {
                status: Some(status @ (401 | 403)),
                ..
            } => CliError::AuthFailed { status },
            CoreError::Api { message, .. }
            | CoreError::Decode { message }
            | CoreError::Internal(message) => CliError::ApiError { message },
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
        }
    }
}
