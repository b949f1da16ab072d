// gridstudy-core: Spreadsheet equipment cache between gridstudy-api and consumers (CLI).

pub mod config;
pub mod convert;
pub mod coordinator;
pub mod error;
pub mod fetcher;
pub mod listener;
pub mod model;
pub mod notice;
pub mod resolver;
pub mod session;
pub mod source;
pub mod store;
pub mod stream;

#[cfg(test)]
mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{FailurePolicy, SessionConfig, TlsVerification};
pub use coordinator::{Coordinator, ReconcileReport};
pub use error::CoreError;
pub use fetcher::Fetcher;
pub use listener::{Followups, Listener};
pub use notice::UserNotice;
pub use resolver::{BuiltNodesResolver, resolve_built_nodes};
pub use session::{Session, SessionStatus};
pub use source::{FetchOptions, HttpStudySource, StudySource};
pub use store::{EquipmentState, EquipmentStore, FetchTicket, StoreAction, TypeCache};
pub use stream::StateStream;

// Re-export model types at the crate root for ergonomics.
pub use model::{
    BuildStatus, DeletedEquipment, EquipmentRecord, EquipmentType, NetworkImpacts, NodeAlias,
    NodeId, NodeType, TreeNode,
};
