// ── Equipment cache store ──
//
// Single-writer state container with push-based change notification.

mod equipment_store;
mod state;

pub use equipment_store::EquipmentStore;
pub use state::{EquipmentState, FetchTicket, StoreAction, TypeCache};
