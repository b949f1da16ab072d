// ── Runtime session configuration ──
//
// Describes *which* study to cache and *how* to reach it. Carries the
// bearer token and tuning, but never touches disk: the CLI builds a
// `SessionConfig` and hands it in.

use std::collections::BTreeSet;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use url::Url;
use uuid::Uuid;

use crate::model::EquipmentType;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (self-signed gateways).
    DangerAcceptInvalid,
}

/// What to do with nodes whose equipment fetch failed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FailurePolicy {
    /// Unmark the node and remember it as failed. It is fetched again
    /// after it leaves and re-enters the desired set, after a full
    /// reset, or on an explicit retry.
    #[default]
    RollBack,
    /// Leave the node marked loaded with no data for the failed types
    /// until it leaves the desired set or the cache is reset.
    KeepMark,
}

/// Configuration for caching one study on one root network.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Study service gateway root.
    pub server_url: Url,
    /// Notification service root (WebSocket endpoint derived from it).
    pub notify_url: Url,
    pub study: Uuid,
    pub root_network: Uuid,
    pub token: Option<SecretString>,
    pub tls: TlsVerification,
    /// Per-request timeout.
    pub timeout: Duration,
    pub failure_policy: FailurePolicy,
    /// Equipment types kept loaded for every desired node.
    pub active_types: BTreeSet<EquipmentType>,
    /// Listen to server push notifications.
    pub notifications_enabled: bool,
}

impl SessionConfig {
    /// Config with defaults for everything but the target study.
    ///
    /// Notifications are read from the same host as `server_url` and
    /// every equipment type is active.
    pub fn new(server_url: Url, study: Uuid, root_network: Uuid) -> Self {
        Self {
            notify_url: server_url.clone(),
            server_url,
            study,
            root_network,
            token: None,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            failure_policy: FailurePolicy::default(),
            active_types: EquipmentType::iter().collect(),
            notifications_enabled: true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn new_uses_server_for_notifications() {
        let url = Url::parse("https://grid.example.org/study").unwrap();
        let config = SessionConfig::new(url.clone(), Uuid::nil(), Uuid::nil());
        assert_eq!(config.notify_url, url);
        assert_eq!(config.failure_policy, FailurePolicy::RollBack);
        assert!(config.active_types.contains(&EquipmentType::Bus));
    }

    #[test]
    fn failure_policy_parses_kebab_case() {
        assert_eq!("keep-mark".parse::<FailurePolicy>().unwrap(), FailurePolicy::KeepMark);
        assert_eq!(FailurePolicy::RollBack.to_string(), "roll-back");
    }
}
