// gridstudy-api: Async Rust client for the study service (HTTP + notifications)

pub mod client;
mod equipments;
pub mod error;
pub mod models;
pub mod transport;
mod tree;
pub mod websocket;

pub use client::StudyClient;
pub use error::Error;
pub use models::{RawEquipmentsByType, RawNodeAlias, RawNodeBuildStatus, RawTreeNode};
pub use transport::{TlsMode, TransportConfig};
pub use websocket::{
    NotificationHandle, NotificationHeaders, ReconnectConfig, StudyEvent, StudyNotification,
};
