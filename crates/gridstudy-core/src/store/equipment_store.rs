// ── Central equipment store ──
//
// Holds the current `EquipmentState` behind a `watch` channel. Every
// mutation goes through `dispatch`, which applies one action inside
// `send_modify`: writers are serialized and each commit is observed by
// subscribers as a whole.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::trace;

use super::state::{EquipmentState, FetchTicket, StoreAction};
use crate::model::{EquipmentRecord, EquipmentType, NodeId};
use crate::stream::StateStream;

/// Process-wide equipment cache.
pub struct EquipmentStore {
    state: watch::Sender<Arc<EquipmentState>>,
    last_commit: watch::Sender<Option<DateTime<Utc>>>,
}

impl EquipmentStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(Arc::new(EquipmentState::default()));
        let (last_commit, _) = watch::channel(None);
        Self { state, last_commit }
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    /// Apply one action and publish the resulting state.
    pub fn dispatch(&self, action: StoreAction) {
        trace!(action = action.name(), "store dispatch");
        self.state.send_modify(|current| {
            let previous = std::mem::take(current);
            *current = Arc::new(Arc::unwrap_or_clone(previous).apply(action));
        });
        self.last_commit.send_replace(Some(Utc::now()));
    }

    /// Register a fetch for `equipment_type`, returning the ticket the
    /// fetch must report back with.
    pub(crate) fn begin_fetch(&self, equipment_type: EquipmentType) -> FetchTicket {
        let mut ticket = FetchTicket::default();
        self.state.send_modify(|current| {
            let previous = std::mem::take(current);
            let next =
                Arc::unwrap_or_clone(previous).apply(StoreAction::FetchStarted { equipment_type });
            ticket = next.ticket(equipment_type);
            *current = Arc::new(next);
        });
        ticket
    }

    // ── Operations ───────────────────────────────────────────────────

    pub fn load(&self, equipment_type: EquipmentType, entries: BTreeMap<NodeId, Vec<EquipmentRecord>>) {
        self.dispatch(StoreAction::Load {
            equipment_type,
            entries,
        });
    }

    pub fn remove_node_data(&self, equipment_type: EquipmentType, node_ids: BTreeSet<NodeId>) {
        self.dispatch(StoreAction::RemoveNodeData {
            equipment_type,
            node_ids,
        });
    }

    pub fn update_equipments(
        &self,
        equipment_type: EquipmentType,
        records: Vec<EquipmentRecord>,
        node_id: NodeId,
    ) {
        self.dispatch(StoreAction::UpdateEquipments {
            equipment_type,
            node_id,
            records,
        });
    }

    pub fn delete_equipments(&self, equipment_type: EquipmentType, ids: Vec<String>, node_id: NodeId) {
        self.dispatch(StoreAction::DeleteEquipments {
            equipment_type,
            node_id,
            ids,
        });
    }

    pub fn reset_equipments(&self) {
        self.dispatch(StoreAction::ResetEquipments);
    }

    pub fn reset_equipments_by_types(&self, types: BTreeSet<EquipmentType>) {
        self.dispatch(StoreAction::ResetEquipmentsByTypes(types));
    }

    // ── Snapshots & subscriptions ────────────────────────────────────

    pub fn snapshot(&self) -> Arc<EquipmentState> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> StateStream<EquipmentState> {
        StateStream::new(self.state.subscribe())
    }

    pub(crate) fn watch(&self) -> watch::Receiver<Arc<EquipmentState>> {
        self.state.subscribe()
    }

    // ── Metadata ─────────────────────────────────────────────────────

    /// When the cache last changed, or `None` if it never did.
    pub fn last_commit(&self) -> Option<DateTime<Utc>> {
        *self.last_commit.borrow()
    }
}

impl Default for EquipmentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn node(n: u128) -> NodeId {
        NodeId::new(Uuid::from_u128(n))
    }

    #[test]
    fn dispatch_publishes_new_snapshot() {
        let store = EquipmentStore::new();
        let before = store.snapshot();
        assert!(store.last_commit().is_none());

        store.load(
            EquipmentType::Load,
            [(node(1), vec![EquipmentRecord::new("L1")])].into(),
        );

        let after = store.snapshot();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(before.equipments(EquipmentType::Load, &node(1)).is_none());
        assert_eq!(after.equipments(EquipmentType::Load, &node(1)).unwrap().len(), 1);
        assert!(store.last_commit().is_some());
    }

    #[test]
    fn begin_fetch_reports_current_ticket() {
        let store = EquipmentStore::new();
        let first = store.begin_fetch(EquipmentType::Line);
        assert_eq!(first, FetchTicket { generation: 0, seq: 1 });
        store.reset_equipments_by_types([EquipmentType::Line].into());
        let second = store.begin_fetch(EquipmentType::Line);
        assert_eq!(second, FetchTicket { generation: 1, seq: 2 });
        assert!(store.snapshot().is_fetching(EquipmentType::Line));
    }

    #[tokio::test]
    async fn subscribers_see_each_commit() {
        let store = EquipmentStore::new();
        let mut stream = store.subscribe();

        store.reset_equipments();
        let state = stream.changed().await.unwrap();
        assert_eq!(state.reset_epoch(), 1);
    }
}
