// ── Synchronization coordinator ──
//
// Keeps the cache's loaded nodes equal to the desired node set: evicts
// nodes that left it, fetches nodes that joined it, and reloads types
// whose optional-column mode or data was reset.

use std::collections::BTreeSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::fetcher::Fetcher;
use crate::model::{EquipmentType, NodeId};
use crate::source::{FetchOptions, StudySource};
use crate::store::{EquipmentState, EquipmentStore, StoreAction};

/// What one reconciliation pass did.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Nodes whose data was dropped.
    pub evicted: BTreeSet<NodeId>,
    /// Newly desired nodes now being fetched for every active type.
    pub fetched: BTreeSet<NodeId>,
    /// Types reloaded over the whole desired set for an optional-column change.
    pub reloaded: Vec<EquipmentType>,
    /// Types fetched for loaded nodes they were missing.
    pub backfilled: Vec<EquipmentType>,
    tasks: Vec<JoinHandle<()>>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.evicted.is_empty()
            && self.fetched.is_empty()
            && self.reloaded.is_empty()
            && self.backfilled.is_empty()
    }

    /// Wait for every fetch this pass started.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                debug!(error = %e, "fetch task ended abnormally");
            }
        }
    }
}

pub struct Coordinator<S> {
    store: Arc<EquipmentStore>,
    fetcher: Fetcher<S>,
    active_types: ArcSwap<BTreeSet<EquipmentType>>,
    /// Requested optional-column mode per type; absent means off.
    optional_requests: DashMap<EquipmentType, bool>,
    wake: watch::Sender<()>,
}

impl<S: StudySource> Coordinator<S> {
    pub fn new(
        store: Arc<EquipmentStore>,
        fetcher: Fetcher<S>,
        active_types: BTreeSet<EquipmentType>,
    ) -> Self {
        Self {
            store,
            fetcher,
            active_types: ArcSwap::from_pointee(active_types),
            optional_requests: DashMap::new(),
            wake: watch::channel(()).0,
        }
    }

    // ── Inputs ───────────────────────────────────────────────────────

    pub fn active_types(&self) -> Arc<BTreeSet<EquipmentType>> {
        self.active_types.load_full()
    }

    /// Change the types kept loaded. Newly active types are backfilled
    /// for every loaded node on the next pass.
    pub fn set_active_types(&self, types: BTreeSet<EquipmentType>) {
        self.active_types.store(Arc::new(types));
        self.wake.send_replace(());
    }

    /// Ask for `equipment_type` to be (re)loaded with or without its
    /// optional fields.
    pub fn request_optional_fields(&self, equipment_type: EquipmentType, load: bool) {
        self.optional_requests.insert(equipment_type, load);
        self.wake.send_replace(());
    }

    /// Forget recorded failures so failed nodes are fetched again.
    pub fn retry_failed(&self) {
        self.store.dispatch(StoreAction::ClearAllFailures);
    }

    fn options_for(&self, equipment_type: EquipmentType) -> FetchOptions {
        FetchOptions {
            optional_fields: self
                .optional_requests
                .get(&equipment_type)
                .is_some_and(|r| *r),
        }
    }

    // ── Reconciliation ───────────────────────────────────────────────

    /// Run one reconciliation pass against `desired`.
    ///
    /// Dispatches nothing when the cache already matches, so running it
    /// twice with unchanged inputs is a no-op.
    pub fn reconcile(&self, desired: &BTreeSet<NodeId>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let active = self.active_types.load_full();

        let state = self.store.snapshot();
        report.evicted = self.evict(&state, desired);

        let state = self.store.snapshot();
        let to_fetch: BTreeSet<NodeId> = desired
            .iter()
            .filter(|n| !state.loaded_node_ids().contains(n) && !state.failed_node_ids().contains(n))
            .copied()
            .collect();

        if to_fetch.is_empty() {
            self.reload_optional(&state, desired, &active, &mut report);
        } else {
            debug!(nodes = to_fetch.len(), "fetching newly desired nodes");
            self.store.dispatch(StoreAction::MarkLoaded(to_fetch.clone()));
            for ty in active.iter().copied() {
                let options = self.options_for(ty);
                // Loading a type from empty fixes its optional-column mode.
                let from_empty = state
                    .type_cache(ty)
                    .is_none_or(|c| c.loaded_node_ids().is_empty() && !c.is_fetching());
                report
                    .tasks
                    .push(self.fetcher.spawn(ty, to_fetch.clone(), options, from_empty));
            }
            report.fetched = to_fetch;
        }

        let state = self.store.snapshot();
        self.backfill(&state, desired, &active, &mut report);
        report
    }

    /// Drop everything held about nodes outside `desired`.
    fn evict(&self, state: &EquipmentState, desired: &BTreeSet<NodeId>) -> BTreeSet<NodeId> {
        let to_remove: BTreeSet<NodeId> = state
            .tracked_node_ids()
            .into_iter()
            .filter(|n| !desired.contains(n))
            .collect();
        if to_remove.is_empty() {
            return to_remove;
        }

        debug!(nodes = to_remove.len(), "evicting nodes");
        for (ty, cache) in state.types() {
            // A type with a fetch in flight may still receive any of them.
            let node_ids: BTreeSet<NodeId> = if cache.is_fetching() {
                to_remove.clone()
            } else {
                cache
                    .tracked_node_ids()
                    .filter(|n| to_remove.contains(n))
                    .copied()
                    .collect()
            };
            if !node_ids.is_empty() {
                self.store.dispatch(StoreAction::RemoveNodeData {
                    equipment_type: ty,
                    node_ids,
                });
            }
        }

        let unmark = intersect(state.loaded_node_ids(), &to_remove);
        if !unmark.is_empty() {
            self.store.dispatch(StoreAction::UnmarkLoaded(unmark));
        }
        let unfail = intersect(state.failed_node_ids(), &to_remove);
        if !unfail.is_empty() {
            self.store.dispatch(StoreAction::ClearFailed(unfail));
        }
        to_remove
    }

    /// Reload types whose requested optional-column mode differs from
    /// what their data was loaded with.
    fn reload_optional(
        &self,
        state: &EquipmentState,
        desired: &BTreeSet<NodeId>,
        active: &BTreeSet<EquipmentType>,
        report: &mut ReconcileReport,
    ) {
        for ty in active.iter().copied() {
            let options = self.options_for(ty);
            let (loaded_with, fetching) = state
                .type_cache(ty)
                .map_or((false, false), |c| (c.optional_fields(), c.is_fetching()));
            if loaded_with == options.optional_fields || fetching {
                continue;
            }

            if desired.is_empty() {
                self.store.dispatch(StoreAction::SetOptionalFields {
                    equipment_type: ty,
                    loaded: options.optional_fields,
                });
                continue;
            }

            debug!(equipment_type = %ty, optional = options.optional_fields, "reloading for optional columns");
            report
                .tasks
                .push(self.fetcher.spawn(ty, desired.clone(), options, true));
            report.reloaded.push(ty);
        }
    }

    /// Fetch loaded, desired nodes an active type does not hold yet.
    fn backfill(
        &self,
        state: &EquipmentState,
        desired: &BTreeSet<NodeId>,
        active: &BTreeSet<EquipmentType>,
        report: &mut ReconcileReport,
    ) {
        for ty in active.iter().copied() {
            let cache = state.type_cache(ty);
            if cache.is_some_and(|c| c.is_fetching()) {
                continue;
            }

            let missing: BTreeSet<NodeId> = state
                .loaded_node_ids()
                .iter()
                .filter(|n| desired.contains(n))
                .filter(|n| {
                    cache.is_none_or(|c| {
                        !c.loaded_node_ids().contains(n) && !c.failed_node_ids().contains(n)
                    })
                })
                .copied()
                .collect();
            if missing.is_empty() {
                continue;
            }

            debug!(equipment_type = %ty, nodes = missing.len(), "backfilling type");
            report
                .tasks
                .push(self.fetcher.spawn(ty, missing, self.options_for(ty), false));
            report.backfilled.push(ty);
        }
    }

    // ── Background loop ──────────────────────────────────────────────

    /// Reconcile on every change of the desired set, the store, or the
    /// coordinator's own inputs, until cancelled.
    pub async fn run(
        self: Arc<Self>,
        mut desired: watch::Receiver<Arc<BTreeSet<NodeId>>>,
        cancel: CancellationToken,
    ) {
        let mut state_rx = self.store.watch();
        let mut wake_rx = self.wake.subscribe();
        info!("coordinator started");

        loop {
            state_rx.borrow_and_update();
            wake_rx.borrow_and_update();
            let current = desired.borrow_and_update().clone();

            let report = self.reconcile(&current);
            if !report.is_noop() {
                debug!(
                    evicted = report.evicted.len(),
                    fetched = report.fetched.len(),
                    reloaded = report.reloaded.len(),
                    backfilled = report.backfilled.len(),
                    "reconciled"
                );
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                changed = desired.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = wake_rx.changed() => {}
            }
        }

        info!("coordinator stopped");
    }
}

fn intersect(set: &BTreeSet<NodeId>, other: &BTreeSet<NodeId>) -> BTreeSet<NodeId> {
    set.intersection(other).copied().collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::FailurePolicy;
    use crate::testing::{FakeSource, node};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::sync::broadcast;

    const LOAD: EquipmentType = EquipmentType::Load;
    const GEN: EquipmentType = EquipmentType::Generator;

    fn setup(
        source: &FakeSource,
        policy: FailurePolicy,
        active: &[EquipmentType],
    ) -> (Coordinator<FakeSource>, Arc<EquipmentStore>) {
        let store = Arc::new(EquipmentStore::new());
        let (notices, _) = broadcast::channel(16);
        let fetcher = Fetcher::new(Arc::new(source.clone()), Arc::clone(&store), policy, notices);
        let coordinator = Coordinator::new(
            Arc::clone(&store),
            fetcher,
            active.iter().copied().collect(),
        );
        (coordinator, store)
    }

    fn set(nodes: &[u128]) -> BTreeSet<NodeId> {
        nodes.iter().copied().map(node).collect()
    }

    fn ab_source() -> FakeSource {
        FakeSource::new()
            .with_equipments(LOAD, node(1), &["L1", "L2"])
            .with_equipments(LOAD, node(2), &["L3"])
            .with_equipments(GEN, node(1), &["G1"])
    }

    #[tokio::test]
    async fn newly_desired_nodes_are_fetched_for_every_active_type() {
        let source = ab_source();
        let (coordinator, store) = setup(&source, FailurePolicy::RollBack, &[LOAD]);

        let report = coordinator.reconcile(&set(&[1, 2]));
        assert_eq!(report.fetched, set(&[1, 2]));
        // Marked before any response arrives.
        assert_eq!(store.snapshot().loaded_node_ids(), &set(&[1, 2]));
        report.join().await;

        let state = store.snapshot();
        let ids = |n| {
            state
                .equipments(LOAD, &node(n))
                .unwrap()
                .iter()
                .map(|r| r.id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(1), ["L1", "L2"]);
        assert_eq!(ids(2), ["L3"]);
        assert_eq!(state.type_cache(LOAD).unwrap().loaded_node_ids(), &set(&[1, 2]));
        assert!(state.type_cache(GEN).is_none());
    }

    #[tokio::test]
    async fn second_pass_with_same_inputs_is_noop() {
        let source = ab_source();
        let (coordinator, store) = setup(&source, FailurePolicy::RollBack, &[LOAD, GEN]);

        coordinator.reconcile(&set(&[1, 2])).join().await;
        let requests = source.request_count();
        let before = store.snapshot();

        let report = coordinator.reconcile(&set(&[1, 2]));
        assert!(report.is_noop());
        assert_eq!(source.request_count(), requests);
        assert!(Arc::ptr_eq(&before, &store.snapshot()));
    }

    #[tokio::test]
    async fn nodes_leaving_the_desired_set_are_evicted_everywhere() {
        let source = ab_source();
        let (coordinator, store) = setup(&source, FailurePolicy::RollBack, &[LOAD, GEN]);
        coordinator.reconcile(&set(&[1, 2])).join().await;

        let report = coordinator.reconcile(&set(&[2]));
        assert_eq!(report.evicted, set(&[1]));
        assert!(report.fetched.is_empty());

        let state = store.snapshot();
        assert_eq!(state.loaded_node_ids(), &set(&[2]));
        for (_, cache) in state.types() {
            assert!(cache.equipments(&node(1)).is_none());
            assert!(!cache.loaded_node_ids().contains(&node(1)));
        }
        assert!(state.equipments(LOAD, &node(2)).is_some());
    }

    #[tokio::test]
    async fn reentering_node_is_refetched_in_full() {
        let source = ab_source();
        let (coordinator, store) = setup(&source, FailurePolicy::RollBack, &[LOAD]);
        coordinator.reconcile(&set(&[1])).join().await;
        coordinator.reconcile(&BTreeSet::new()).join().await;
        assert!(store.snapshot().tracked_node_ids().is_empty());

        source.set_equipments(LOAD, node(1), crate::testing::records(&["L9"]));
        coordinator.reconcile(&set(&[1])).join().await;

        let state = store.snapshot();
        let list = state.equipments(LOAD, &node(1)).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "L9");
        assert_eq!(source.requests(LOAD).len(), 2);
    }

    #[tokio::test]
    async fn rollback_unmarks_failed_node_without_spinning() {
        let source = ab_source().failing(node(2));
        let (coordinator, store) = setup(&source, FailurePolicy::RollBack, &[LOAD]);

        coordinator.reconcile(&set(&[1, 2])).join().await;
        let state = store.snapshot();
        assert_eq!(state.loaded_node_ids(), &set(&[1]));
        assert_eq!(state.failed_node_ids(), &set(&[2]));
        assert!(state.equipments(LOAD, &node(1)).is_some());
        assert!(state.equipments(LOAD, &node(2)).is_none());

        let requests = source.request_count();
        assert!(coordinator.reconcile(&set(&[1, 2])).is_noop());
        assert_eq!(source.request_count(), requests);
    }

    #[tokio::test]
    async fn rollback_retries_after_leaving_and_reentering() {
        let source = ab_source().failing(node(2));
        let (coordinator, store) = setup(&source, FailurePolicy::RollBack, &[LOAD]);
        coordinator.reconcile(&set(&[1, 2])).join().await;

        coordinator.reconcile(&set(&[1])).join().await;
        assert!(store.snapshot().failed_node_ids().is_empty());

        source.heal(node(2));
        let report = coordinator.reconcile(&set(&[1, 2]));
        assert_eq!(report.fetched, set(&[2]));
        report.join().await;
        assert!(store.snapshot().equipments(LOAD, &node(2)).is_some());
    }

    #[tokio::test]
    async fn retry_failed_refetches_in_place() {
        let source = ab_source().failing(node(2));
        let (coordinator, store) = setup(&source, FailurePolicy::RollBack, &[LOAD]);
        coordinator.reconcile(&set(&[1, 2])).join().await;

        source.heal(node(2));
        coordinator.retry_failed();
        let report = coordinator.reconcile(&set(&[1, 2]));
        assert_eq!(report.fetched, set(&[2]));
        report.join().await;

        let state = store.snapshot();
        assert_eq!(state.loaded_node_ids(), &set(&[1, 2]));
        assert!(state.equipments(LOAD, &node(2)).is_some());
    }

    #[tokio::test]
    async fn keep_mark_leaves_failed_node_loaded_and_empty() {
        let source = ab_source().failing(node(2));
        let (coordinator, store) = setup(&source, FailurePolicy::KeepMark, &[LOAD]);

        coordinator.reconcile(&set(&[1, 2])).join().await;
        let state = store.snapshot();
        assert_eq!(state.loaded_node_ids(), &set(&[1, 2]));
        assert!(state.failed_node_ids().is_empty());
        assert!(state.equipments(LOAD, &node(2)).is_none());

        let requests = source.request_count();
        assert!(coordinator.reconcile(&set(&[1, 2])).is_noop());
        assert_eq!(source.request_count(), requests);
    }

    async fn wait_for_requests(source: &FakeSource, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while source.request_count() < count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn late_arrival_for_evicted_node_is_dropped() {
        let source = ab_source();
        let gate = source.gate(node(2));
        let (coordinator, store) = setup(&source, FailurePolicy::RollBack, &[LOAD]);

        let first = coordinator.reconcile(&set(&[1, 2]));
        let second = coordinator.reconcile(&set(&[1]));
        assert_eq!(second.evicted, set(&[2]));
        assert!(second.fetched.is_empty());

        gate.notify_one();
        first.join().await;

        let state = store.snapshot();
        assert!(state.equipments(LOAD, &node(2)).is_none());
        assert!(state.equipments(LOAD, &node(1)).is_some());
        assert!(state.tracked_node_ids().iter().all(|n| *n == node(1)));
        assert!(coordinator.reconcile(&set(&[1])).is_noop());
    }

    #[tokio::test]
    async fn older_fetch_does_not_overwrite_reentered_node() {
        let source = FakeSource::new().with_equipments(LOAD, node(1), &["OLD"]);
        let gate = source.gate(node(1));
        let (coordinator, store) = setup(&source, FailurePolicy::RollBack, &[LOAD]);

        let first = coordinator.reconcile(&set(&[1]));
        wait_for_requests(&source, 1).await;

        coordinator.reconcile(&BTreeSet::new());
        source.set_equipments(LOAD, node(1), crate::testing::records(&["NEW"]));
        source.ungate(node(1));
        let second = coordinator.reconcile(&set(&[1]));
        assert_eq!(second.fetched, set(&[1]));
        second.join().await;

        gate.notify_one();
        first.join().await;

        let state = store.snapshot();
        let ids: Vec<_> = state
            .equipments(LOAD, &node(1))
            .unwrap()
            .iter()
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(ids, ["NEW"]);
        assert!(!state.is_fetching(LOAD));
        assert!(coordinator.reconcile(&set(&[1])).is_noop());
    }

    #[tokio::test]
    async fn reset_types_are_backfilled_for_loaded_nodes() {
        let source = ab_source();
        let (coordinator, store) = setup(&source, FailurePolicy::RollBack, &[LOAD, GEN]);
        coordinator.reconcile(&set(&[1])).join().await;

        store.reset_equipments_by_types([LOAD].into());
        let report = coordinator.reconcile(&set(&[1]));
        assert!(report.fetched.is_empty());
        assert_eq!(report.backfilled, vec![LOAD]);
        report.join().await;

        assert!(store.snapshot().equipments(LOAD, &node(1)).is_some());
        assert_eq!(source.requests(LOAD).len(), 2);
        assert_eq!(source.requests(GEN).len(), 1);
    }

    #[tokio::test]
    async fn full_reset_refetches_everything() {
        let source = ab_source();
        let (coordinator, store) = setup(&source, FailurePolicy::RollBack, &[LOAD]);
        coordinator.reconcile(&set(&[1, 2])).join().await;

        store.reset_equipments();
        let report = coordinator.reconcile(&set(&[1, 2]));
        assert_eq!(report.fetched, set(&[1, 2]));
        report.join().await;
        assert_eq!(store.snapshot().type_cache(LOAD).unwrap().record_count(), 3);
    }

    #[tokio::test]
    async fn newly_active_type_is_backfilled() {
        let source = ab_source();
        let (coordinator, store) = setup(&source, FailurePolicy::RollBack, &[LOAD]);
        coordinator.reconcile(&set(&[1])).join().await;

        coordinator.set_active_types([LOAD, GEN].into());
        let report = coordinator.reconcile(&set(&[1]));
        assert_eq!(report.backfilled, vec![GEN]);
        report.join().await;
        assert!(store.snapshot().equipments(GEN, &node(1)).is_some());
    }

    #[tokio::test]
    async fn optional_column_request_reloads_whole_set_once() {
        let source = ab_source();
        let (coordinator, store) = setup(&source, FailurePolicy::RollBack, &[LOAD]);
        coordinator.reconcile(&set(&[1, 2])).join().await;

        coordinator.request_optional_fields(LOAD, true);
        let report = coordinator.reconcile(&set(&[1, 2]));
        assert_eq!(report.reloaded, vec![LOAD]);
        report.join().await;

        assert!(store.snapshot().type_cache(LOAD).unwrap().optional_fields());
        let reloaded: Vec<_> = source.requests(LOAD).into_iter().skip(2).collect();
        assert_eq!(reloaded, vec![(node(1), true), (node(2), true)]);
        assert!(coordinator.reconcile(&set(&[1, 2])).is_noop());

        // Cleaning goes back to plain fetches.
        coordinator.request_optional_fields(LOAD, false);
        coordinator.reconcile(&set(&[1, 2])).join().await;
        assert!(!store.snapshot().type_cache(LOAD).unwrap().optional_fields());
    }

    #[tokio::test]
    async fn optional_columns_requested_before_first_load_fetch_once() {
        let source = ab_source();
        let (coordinator, store) = setup(&source, FailurePolicy::RollBack, &[LOAD]);
        coordinator.request_optional_fields(LOAD, true);

        let first = coordinator.reconcile(&set(&[1]));
        assert_eq!(first.fetched, set(&[1]));
        first.join().await;

        assert!(store.snapshot().type_cache(LOAD).unwrap().optional_fields());
        assert!(coordinator.reconcile(&set(&[1])).is_noop());
        assert_eq!(source.requests(LOAD), vec![(node(1), true)]);
    }

    #[tokio::test]
    async fn run_loop_follows_desired_set() {
        let source = ab_source();
        let (coordinator, store) = setup(&source, FailurePolicy::RollBack, &[LOAD]);
        let coordinator = Arc::new(coordinator);
        let (desired_tx, desired_rx) = watch::channel(Arc::new(BTreeSet::new()));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&coordinator).run(desired_rx, cancel.clone()));

        let mut states = store.subscribe();
        desired_tx.send_replace(Arc::new(set(&[1])));
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let state = states.changed().await.unwrap();
                if state.equipments(LOAD, &node(1)).is_some() {
                    break;
                }
            }
        })
        .await
        .unwrap();

        desired_tx.send_replace(Arc::new(BTreeSet::new()));
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let state = states.changed().await.unwrap();
                if state.tracked_node_ids().is_empty() {
                    break;
                }
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        task.await.unwrap();
    }
}
