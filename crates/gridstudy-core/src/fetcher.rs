// ── Equipment fetcher ──
//
// Loads one equipment type for a set of nodes: one request per node, all
// concurrent, one store commit when they have all settled.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::FailurePolicy;
use crate::model::{EquipmentRecord, EquipmentType, NodeId};
use crate::notice::{EQUIPMENTS_FETCH_ERROR, UserNotice};
use crate::source::{FetchOptions, StudySource};
use crate::store::{EquipmentStore, FetchTicket, StoreAction};

/// What one fetch produced.
#[derive(Debug, Default)]
struct FetchOutcome {
    entries: BTreeMap<NodeId, Vec<EquipmentRecord>>,
    failed: BTreeSet<NodeId>,
}

/// Spawns equipment fetches and commits their results.
pub struct Fetcher<S> {
    source: Arc<S>,
    store: Arc<EquipmentStore>,
    policy: FailurePolicy,
    notices: broadcast::Sender<UserNotice>,
}

impl<S> Clone for Fetcher<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            store: Arc::clone(&self.store),
            policy: self.policy,
            notices: self.notices.clone(),
        }
    }
}

impl<S: StudySource> Fetcher<S> {
    pub fn new(
        source: Arc<S>,
        store: Arc<EquipmentStore>,
        policy: FailurePolicy,
        notices: broadcast::Sender<UserNotice>,
    ) -> Self {
        Self {
            source,
            store,
            policy,
            notices,
        }
    }

    /// Fetch `equipment_type` for `nodes` in the background.
    ///
    /// The type is flagged as fetching before this returns. When
    /// `full_reload` is set the commit also records which optional-field
    /// mode the type's whole loaded set now reflects.
    pub fn spawn(
        &self,
        equipment_type: EquipmentType,
        nodes: BTreeSet<NodeId>,
        options: FetchOptions,
        full_reload: bool,
    ) -> JoinHandle<()> {
        let ticket = self.store.begin_fetch(equipment_type);
        let this = self.clone();
        tokio::spawn(async move {
            this.run(equipment_type, nodes, options, ticket, full_reload)
                .await;
        })
    }

    async fn run(
        &self,
        equipment_type: EquipmentType,
        nodes: BTreeSet<NodeId>,
        options: FetchOptions,
        ticket: FetchTicket,
        full_reload: bool,
    ) {
        debug!(%equipment_type, nodes = nodes.len(), ?options, "fetching equipments");

        // Run the per-node requests in their own task so a panic anywhere
        // in them surfaces here as a JoinError instead of unwinding.
        let task = tokio::spawn(fetch_nodes(
            Arc::clone(&self.source),
            equipment_type,
            nodes.clone(),
            options,
        ));

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(%equipment_type, error = %e, "equipment fetch aborted");
                let _ = self.notices.send(UserNotice::new(
                    EQUIPMENTS_FETCH_ERROR,
                    format!("Loading {equipment_type} failed: {e}"),
                ));
                FetchOutcome {
                    entries: BTreeMap::new(),
                    failed: nodes,
                }
            }
        };

        debug!(
            %equipment_type,
            loaded = outcome.entries.len(),
            failed = outcome.failed.len(),
            "equipment fetch settled"
        );

        self.store.dispatch(StoreAction::FetchFinished {
            equipment_type,
            ticket,
            entries: outcome.entries,
            failed: outcome.failed,
            policy: self.policy,
            optional_fields: full_reload.then_some(options.optional_fields),
        });
    }
}

async fn fetch_nodes<S: StudySource>(
    source: Arc<S>,
    equipment_type: EquipmentType,
    nodes: BTreeSet<NodeId>,
    options: FetchOptions,
) -> FetchOutcome {
    let results = join_all(nodes.into_iter().map(|node| {
        let source = Arc::clone(&source);
        async move { (node, source.equipments(equipment_type, node, options).await) }
    }))
    .await;

    let mut outcome = FetchOutcome::default();
    for (node, result) in results {
        match result {
            Ok(records) => {
                outcome.entries.insert(node, records);
            }
            Err(e) => {
                warn!(%equipment_type, %node, error = %e, "equipment fetch failed for node");
                outcome.failed.insert(node);
            }
        }
    }
    outcome
}
