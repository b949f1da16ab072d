// ── Domain model ──
//
// Canonical types shared by the resolver, the cache store, the
// coordinator and the notification listener.

mod equipment;
mod ids;
mod impact;
mod tree;

pub use equipment::{EquipmentRecord, EquipmentType};
pub use ids::NodeId;
pub use impact::{DeletedEquipment, NetworkImpacts};
pub use tree::{BUILT_MARKER, BuildStatus, NodeAlias, NodeType, TreeNode};
