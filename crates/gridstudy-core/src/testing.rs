// ── In-memory study source for tests ──

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, broadcast};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use gridstudy_api::StudyEvent;

use crate::error::CoreError;
use crate::model::{
    BuildStatus, EquipmentRecord, EquipmentType, NodeAlias, NodeId, NodeType, TreeNode,
};
use crate::source::{FetchOptions, StudySource};

pub(crate) fn node(n: u128) -> NodeId {
    NodeId::new(Uuid::from_u128(n))
}

pub(crate) fn tree_node(n: u128, build_status: BuildStatus) -> TreeNode {
    TreeNode {
        id: node(n),
        name: format!("N{n}"),
        node_type: if n == 1 {
            NodeType::Root
        } else {
            NodeType::NetworkModification
        },
        build_status,
        parent: (n != 1).then_some(node(1)),
    }
}

pub(crate) fn alias(n: u128, name: &str) -> NodeAlias {
    NodeAlias {
        id: Some(node(n)),
        name: Some(format!("N{n}")),
        alias: name.into(),
    }
}

pub(crate) fn records(ids: &[&str]) -> Vec<EquipmentRecord> {
    ids.iter().map(|id| EquipmentRecord::new(*id)).collect()
}

#[derive(Default)]
struct Inner {
    equipments: Mutex<HashMap<(EquipmentType, NodeId), Vec<EquipmentRecord>>>,
    by_substation: Mutex<BTreeMap<EquipmentType, Vec<EquipmentRecord>>>,
    failing: Mutex<BTreeSet<NodeId>>,
    panicking: Mutex<BTreeSet<NodeId>>,
    gates: Mutex<HashMap<NodeId, Arc<Notify>>>,
    tree: Mutex<Option<Vec<TreeNode>>>,
    aliases: Mutex<Option<Vec<NodeAlias>>>,
    requests: Mutex<Vec<(EquipmentType, NodeId, bool)>>,
    substation_requests: Mutex<Vec<(NodeId, Vec<String>)>>,
    events: Mutex<Option<broadcast::Sender<Arc<StudyEvent>>>>,
}

/// Scriptable `StudySource`. Clones share state.
#[derive(Clone, Default)]
pub(crate) struct FakeSource {
    inner: Arc<Inner>,
}

#[allow(clippy::unwrap_used)]
impl FakeSource {
    pub(crate) fn new() -> Self {
        let source = Self::default();
        *source.inner.tree.lock().unwrap() = Some(Vec::new());
        *source.inner.aliases.lock().unwrap() = Some(Vec::new());
        source
    }

    pub(crate) fn with_equipments(self, ty: EquipmentType, node: NodeId, ids: &[&str]) -> Self {
        self.set_equipments(ty, node, records(ids));
        self
    }

    pub(crate) fn set_equipments(&self, ty: EquipmentType, node: NodeId, list: Vec<EquipmentRecord>) {
        self.inner.equipments.lock().unwrap().insert((ty, node), list);
    }

    pub(crate) fn failing(self, node: NodeId) -> Self {
        self.inner.failing.lock().unwrap().insert(node);
        self
    }

    pub(crate) fn heal(&self, node: NodeId) {
        self.inner.failing.lock().unwrap().remove(&node);
    }

    pub(crate) fn panicking(self, node: NodeId) -> Self {
        self.inner.panicking.lock().unwrap().insert(node);
        self
    }

    /// Hold fetches for `node` until the returned `Notify` is signalled.
    pub(crate) fn gate(&self, node: NodeId) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.inner.gates.lock().unwrap().insert(node, Arc::clone(&gate));
        gate
    }

    /// Let fetches for `node` through again.
    pub(crate) fn ungate(&self, node: NodeId) {
        self.inner.gates.lock().unwrap().remove(&node);
    }

    pub(crate) fn with_substation_equipments(self, ty: EquipmentType, list: Vec<EquipmentRecord>) -> Self {
        self.inner.by_substation.lock().unwrap().insert(ty, list);
        self
    }

    pub(crate) fn set_tree(&self, tree: Option<Vec<TreeNode>>) {
        *self.inner.tree.lock().unwrap() = tree;
    }

    pub(crate) fn set_aliases(&self, aliases: Option<Vec<NodeAlias>>) {
        *self.inner.aliases.lock().unwrap() = aliases;
    }

    pub(crate) fn with_events(self) -> (Self, broadcast::Sender<Arc<StudyEvent>>) {
        let (tx, _) = broadcast::channel(64);
        *self.inner.events.lock().unwrap() = Some(tx.clone());
        (self, tx)
    }

    /// `(node, optional_fields)` of every request for `ty`, in order.
    pub(crate) fn requests(&self, ty: EquipmentType) -> Vec<(NodeId, bool)> {
        self.inner
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| *t == ty)
            .map(|(_, n, o)| (*n, *o))
            .collect()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.inner.requests.lock().unwrap().len()
    }

    pub(crate) fn substation_requests(&self) -> Vec<(NodeId, Vec<String>)> {
        self.inner.substation_requests.lock().unwrap().clone()
    }
}

#[allow(clippy::unwrap_used)]
impl StudySource for FakeSource {
    async fn equipments(
        &self,
        equipment_type: EquipmentType,
        node: NodeId,
        options: FetchOptions,
    ) -> Result<Vec<EquipmentRecord>, CoreError> {
        self.inner
            .requests
            .lock()
            .unwrap()
            .push((equipment_type, node, options.optional_fields));
        // Read before waiting so a held request answers with what the
        // service had when it was asked.
        let records = self
            .inner
            .equipments
            .lock()
            .unwrap()
            .get(&(equipment_type, node))
            .cloned()
            .unwrap_or_default();

        let gate = self.inner.gates.lock().unwrap().get(&node).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        assert!(
            !self.inner.panicking.lock().unwrap().contains(&node),
            "scripted panic for {node}"
        );
        if self.inner.failing.lock().unwrap().contains(&node) {
            return Err(CoreError::Api {
                message: format!("scripted failure for {node}"),
                status: Some(500),
            });
        }
        Ok(records)
    }

    async fn substations_equipments(
        &self,
        node: NodeId,
        substation_ids: &[String],
    ) -> Result<BTreeMap<EquipmentType, Vec<EquipmentRecord>>, CoreError> {
        self.inner
            .substation_requests
            .lock()
            .unwrap()
            .push((node, substation_ids.to_vec()));
        Ok(self.inner.by_substation.lock().unwrap().clone())
    }

    async fn tree(&self) -> Result<Vec<TreeNode>, CoreError> {
        self.inner
            .tree
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CoreError::Internal("scripted tree failure".into()))
    }

    async fn node_aliases(&self) -> Result<Vec<NodeAlias>, CoreError> {
        self.inner
            .aliases
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| CoreError::Internal("scripted alias failure".into()))
    }

    fn notifications(
        &self,
        _cancel: CancellationToken,
    ) -> Result<Option<broadcast::Receiver<Arc<StudyEvent>>>, CoreError> {
        Ok(self
            .inner
            .events
            .lock()
            .unwrap()
            .as_ref()
            .map(broadcast::Sender::subscribe))
    }
}
