// ── Push-notification listener ──
//
// Applies server-pushed study notifications to the cache outside the
// fetch cycle: incremental updates when a modification touched a few
// substations, resets when it touched whole collections, and follow-up
// requests when aliases or the tree need refetching.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use gridstudy_api::{StudyEvent, StudyNotification};

use crate::model::{EquipmentType, NetworkImpacts, NodeAlias, NodeId};
use crate::source::StudySource;
use crate::store::EquipmentStore;

// ── Update types ─────────────────────────────────────────────────────

const STUDY: &str = "study";
const NODE_ALIASES_UPDATED: &str = "nodeAliasesUpdated";
const ALIAS_AFFECTING: [&str; 3] = ["nodeEdited", "nodeDeleted", "nodeRenamed"];
const TREE_AFFECTING: [&str; 6] = [
    "nodeBuildStatusUpdated",
    "buildCompleted",
    "buildFailed",
    "nodeCreated",
    "nodeDeleted",
    "nodeMoved",
];

/// Work a notification asks the session to do beyond the cache itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Followups {
    pub refetch_aliases: bool,
    pub refetch_tree: bool,
}

pub struct Listener<S> {
    store: Arc<EquipmentStore>,
    source: Arc<S>,
    study: Uuid,
    root_network: Uuid,
}

impl<S: StudySource> Listener<S> {
    pub fn new(store: Arc<EquipmentStore>, source: Arc<S>, study: Uuid, root_network: Uuid) -> Self {
        Self {
            store,
            source,
            study,
            root_network,
        }
    }

    /// Apply one event. `aliases` is the session's current alias list,
    /// used to decide whether a node event concerns an aliased node.
    pub async fn handle(&self, event: &StudyEvent, aliases: Option<&[NodeAlias]>) -> Followups {
        match event {
            StudyEvent::Opened { reconnect: false } => {
                debug!("notification stream opened");
                Followups::default()
            }
            StudyEvent::Opened { reconnect: true } => {
                debug!("notification stream reconnected, resetting cache");
                self.store.reset_equipments();
                Followups::default()
            }
            StudyEvent::Message(notification) => self.handle_message(notification, aliases).await,
        }
    }

    fn is_for_us(&self, notification: &StudyNotification) -> bool {
        let headers = &notification.headers;
        headers.study_uuid == Some(self.study)
            && headers.root_network_uuid.is_none_or(|rn| rn == self.root_network)
    }

    async fn handle_message(
        &self,
        notification: &StudyNotification,
        aliases: Option<&[NodeAlias]>,
    ) -> Followups {
        if !self.is_for_us(notification) {
            return Followups::default();
        }
        let Some(update_type) = notification.headers.update_type.as_deref() else {
            return Followups::default();
        };

        if update_type == STUDY {
            self.apply_network_impacts(notification).await;
        }

        Followups {
            refetch_aliases: update_type == NODE_ALIASES_UPDATED
                || (ALIAS_AFFECTING.contains(&update_type) && touches_alias(notification, aliases)),
            refetch_tree: TREE_AFFECTING.contains(&update_type),
        }
    }

    async fn apply_network_impacts(&self, notification: &StudyNotification) {
        let Some(node) = notification.headers.node.map(NodeId::from) else {
            debug!("network impact without node header, ignoring");
            return;
        };

        let parsed = notification
            .payload
            .as_deref()
            .ok_or_else(|| "missing payload".to_owned())
            .and_then(|p| NetworkImpacts::parse(p).map_err(|e| e.to_string()));
        let impacts = match parsed {
            Ok(impacts) => impacts,
            Err(e) => {
                warn!(%node, error = %e, "unreadable network impact, resetting cache");
                self.store.reset_equipments();
                return;
            }
        };

        let types = impacts.impacted_types();
        if types.contains(&EquipmentType::Substation) {
            debug!(%node, "substations impacted, resetting cache");
            self.store.reset_equipments();
        } else if !types.is_empty() {
            debug!(%node, ?types, "collections impacted, resetting types");
            self.store.reset_equipments_by_types(types);
        } else if !impacts.impacted_substations_ids.is_empty()
            && self.store.snapshot().has_entries_for(&node)
        {
            self.update_substations(node, &impacts).await;
            self.apply_deletions(node, &impacts);
        } else {
            self.apply_deletions(node, &impacts);
        }
    }

    async fn update_substations(&self, node: NodeId, impacts: &NetworkImpacts) {
        let ids = &impacts.impacted_substations_ids;
        debug!(%node, substations = ids.len(), "refreshing impacted substations");

        match self.source.substations_equipments(node, ids).await {
            Ok(by_type) => {
                let state = self.store.snapshot();
                for (ty, records) in by_type {
                    if records.is_empty() || state.equipments(ty, &node).is_none() {
                        continue;
                    }
                    self.store.update_equipments(ty, records, node);
                }
            }
            Err(e) => {
                warn!(%node, error = %e, "substation refresh failed, resetting cache");
                self.store.reset_equipments();
            }
        }
    }

    fn apply_deletions(&self, node: NodeId, impacts: &NetworkImpacts) {
        for (ty, ids) in impacts.deletions_by_type() {
            debug!(%node, equipment_type = %ty, count = ids.len(), "deleting equipments");
            self.store.delete_equipments(ty, ids, node);
        }
    }
}

/// Whether the notification's node(s) are referenced by a valid alias.
fn touches_alias(notification: &StudyNotification, aliases: Option<&[NodeAlias]>) -> bool {
    let aliased: BTreeSet<NodeId> = aliases
        .unwrap_or_default()
        .iter()
        .filter_map(NodeAlias::target)
        .collect();
    let headers = &notification.headers;
    headers
        .node
        .iter()
        .chain(headers.nodes.iter())
        .any(|n| aliased.contains(&NodeId::from(*n)))
}
