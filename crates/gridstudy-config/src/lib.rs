//! Shared configuration for gridstudy tools.
//!
//! TOML profiles, token resolution (env + keyring + plaintext), and
//! translation to `gridstudy_core::SessionConfig`. The CLI adds
//! `GlobalOpts`-aware overrides on top.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use gridstudy_core::{EquipmentType, FailurePolicy, SessionConfig, TlsVerification};

/// Keyring service name tokens are stored under.
pub const KEYRING_SERVICE: &str = "gridstudy";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named study profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up a profile by name, falling back to the default profile.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default")
            .to_owned();
        match self.profiles.get(&name) {
            Some(profile) => Ok((name, profile)),
            None => Err(ConfigError::UnknownProfile { name }),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}

/// A named study profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Study service gateway URL (e.g., "https://grid.example.org/api/gateway/study").
    pub server: String,

    /// Notification service URL; defaults to `server`.
    pub notify_server: Option<String>,

    /// Study UUID.
    pub study: String,

    /// Root network UUID.
    pub root_network: String,

    /// Bearer token (plaintext — prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the bearer token.
    pub token_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Accept invalid TLS certificates.
    pub insecure: Option<bool>,

    /// Override timeout (seconds).
    pub timeout: Option<u64>,

    /// "roll-back" (default) or "keep-mark".
    pub failure_policy: Option<FailurePolicy>,

    /// Equipment type tags to keep loaded; all types when unset.
    pub types: Option<Vec<String>>,

    /// Listen to push notifications (default true).
    pub notifications: Option<bool>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "gridstudy", "gridstudy").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("gridstudy");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from `path` + environment.
///
/// Environment keys nest with a double underscore:
/// `GRIDSTUDY_DEFAULTS__OUTPUT=json`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("GRIDSTUDY_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist or is invalid.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Token resolution (without CLI flags) ────────────────────────────

/// Resolve the bearer token: env var named by the profile, then the
/// system keyring, then plaintext. `None` means anonymous access.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    // 1. Profile's token_env → env var lookup
    if let Some(ref env_name) = profile.token_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/token")) {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    profile.token.clone().map(SecretString::from)
}

// ── Field parsing ───────────────────────────────────────────────────

pub fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })
}

pub fn parse_uuid(field: &str, raw: &str) -> Result<Uuid, ConfigError> {
    Uuid::parse_str(raw).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid UUID '{raw}': {e}"),
    })
}

/// Parse equipment type tags (`LOAD`, `TWO_WINDINGS_TRANSFORMER`, ...).
///
/// Case-insensitive; unknown tags are an error here, unlike on the wire.
pub fn parse_types<S: AsRef<str>>(raw: &[S]) -> Result<BTreeSet<EquipmentType>, ConfigError> {
    raw.iter()
        .map(|tag| {
            let tag = tag.as_ref();
            EquipmentType::from_tag(&tag.to_ascii_uppercase()).ok_or_else(|| {
                ConfigError::Validation {
                    field: "types".into(),
                    reason: format!("unknown equipment type '{tag}'"),
                }
            })
        })
        .collect()
}

/// Build a `SessionConfig` from a profile, without CLI flag overrides.
pub fn profile_to_session_config(
    profile: &Profile,
    profile_name: &str,
) -> Result<SessionConfig, ConfigError> {
    let server_url = parse_url("server", &profile.server)?;
    let study = parse_uuid("study", &profile.study)?;
    let root_network = parse_uuid("root_network", &profile.root_network)?;

    let mut config = SessionConfig::new(server_url, study, root_network);
    if let Some(ref notify) = profile.notify_server {
        config.notify_url = parse_url("notify_server", notify)?;
    }

    config.token = resolve_token(profile, profile_name);
    config.tls = if profile.insecure.unwrap_or(false) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or_else(default_timeout));
    config.failure_policy = profile.failure_policy.unwrap_or_default();
    if let Some(ref types) = profile.types {
        config.active_types = parse_types(types)?;
    }
    config.notifications_enabled = profile.notifications.unwrap_or(true);

    Ok(config)
}
