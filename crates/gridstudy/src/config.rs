//! CLI configuration — thin wrapper around `gridstudy_config` shared types.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides
//! (--server, --study, --token, etc.) on top of the chosen profile.

use std::time::Duration;

use secrecy::SecretString;

use gridstudy_core::{SessionConfig, TlsVerification};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use gridstudy_config::{
    Config, KEYRING_SERVICE, Profile, config_path, load_config_or_default, parse_types,
    parse_url, parse_uuid, save_config,
};

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build a `SessionConfig` from the config file, profile, and CLI overrides.
pub fn build_session_config(global: &GlobalOpts) -> Result<SessionConfig, CliError> {
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    if let Some(profile) = cfg.profiles.get(&profile_name) {
        return resolve_profile(profile, &profile_name, global);
    }

    // An explicitly requested profile must exist.
    if global.profile.is_some() {
        let mut available: Vec<_> = cfg.profiles.keys().cloned().collect();
        available.sort();
        return Err(CliError::ProfileNotFound {
            name: profile_name,
            available: available.join(", "),
        });
    }

    // No profile -- try to build from CLI flags / env vars alone
    let no_config = || CliError::NoConfig {
        path: config_path().display().to_string(),
    };
    let profile = Profile {
        server: global.server.clone().ok_or_else(no_config)?,
        study: global.study.clone().ok_or_else(no_config)?,
        root_network: global.root_network.clone().ok_or_else(no_config)?,
        ..Profile::default()
    };
    resolve_profile(&profile, &profile_name, global)
}

/// Translate a `Profile` + global flags into a `SessionConfig`.
///
/// CLI flag overrides take priority over profile values.
pub fn resolve_profile(
    profile: &Profile,
    profile_name: &str,
    global: &GlobalOpts,
) -> Result<SessionConfig, CliError> {
    let mut merged = profile.clone();
    if let Some(ref server) = global.server {
        merged.server.clone_from(server);
    }
    if let Some(ref study) = global.study {
        merged.study.clone_from(study);
    }
    if let Some(ref root_network) = global.root_network {
        merged.root_network.clone_from(root_network);
    }
    if global.timeout.is_some() {
        merged.timeout = global.timeout;
    }

    let mut config = gridstudy_config::profile_to_session_config(&merged, profile_name)?;

    if let Some(ref token) = global.token {
        config.token = Some(SecretString::from(token.clone()));
    }
    if global.insecure {
        config.tls = TlsVerification::DangerAcceptInvalid;
    }
    if config.timeout.is_zero() {
        config.timeout = Duration::from_secs(30);
    }

    Ok(config)
}
