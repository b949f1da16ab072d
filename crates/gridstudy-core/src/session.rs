// ── Study session ──
//
// Full lifecycle of one spreadsheet cache: owns the store, the resolver
// inputs (tree, aliases, selection), the coordinator and listener
// background tasks, and the user-notice channel.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gridstudy_api::StudyEvent;

use crate::config::SessionConfig;
use crate::coordinator::Coordinator;
use crate::error::CoreError;
use crate::fetcher::Fetcher;
use crate::listener::Listener;
use crate::model::{EquipmentType, NodeAlias, NodeId, TreeNode};
use crate::notice::{NODE_ALIASES_FETCH_ERROR, TREE_FETCH_ERROR, UserNotice};
use crate::resolver::BuiltNodesResolver;
use crate::source::{HttpStudySource, StudySource};
use crate::store::{EquipmentState, EquipmentStore};
use crate::stream::StateStream;

const NOTICE_CHANNEL_SIZE: usize = 64;

/// Upper bound on reconciliation passes in [`Session::settle`].
const SETTLE_MAX_PASSES: usize = 8;

// ── SessionStatus ────────────────────────────────────────────────────

/// Lifecycle state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Starting,
    Running,
    Failed,
    Stopped,
}

// ── Session ──────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<SessionInner>`.
pub struct Session<S: StudySource = HttpStudySource> {
    inner: Arc<SessionInner<S>>,
}

impl<S: StudySource> Clone for Session<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SessionInner<S> {
    config: SessionConfig,
    source: Arc<S>,
    store: Arc<EquipmentStore>,
    coordinator: Arc<Coordinator<S>>,
    listener: Listener<S>,
    resolver: BuiltNodesResolver,
    tree: watch::Sender<Arc<Vec<TreeNode>>>,
    /// `None` until aliases load, and again after a failed refetch.
    aliases: watch::Sender<Option<Arc<Vec<NodeAlias>>>>,
    selected: watch::Sender<Option<NodeId>>,
    desired: watch::Sender<Arc<BTreeSet<NodeId>>>,
    notices: broadcast::Sender<UserNotice>,
    status: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Session<HttpStudySource> {
    /// Create a session talking to the study service over HTTP. Does
    /// NOT fetch anything: call [`start`](Self::start).
    pub fn new(config: SessionConfig) -> Result<Self, CoreError> {
        let source = HttpStudySource::new(config.clone())?;
        Ok(Self::with_source(config, source))
    }

    /// One-shot: load the tree and aliases, select `node`, fetch until
    /// the cache settles, run the closure, shut down.
    ///
    /// No background tasks or notification stream are started.
    pub async fn oneshot<F, Fut, T>(
        config: SessionConfig,
        node: Option<NodeId>,
        f: F,
    ) -> Result<T, CoreError>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut cfg = config;
        cfg.notifications_enabled = false;

        let session = Session::new(cfg)?;
        session.prime().await?;
        session.select_node(node);
        session.settle().await;
        let result = f(session.clone()).await;
        session.shutdown().await;
        result
    }
}

impl<S: StudySource> Session<S> {
    pub fn with_source(config: SessionConfig, source: S) -> Self {
        let source = Arc::new(source);
        let store = Arc::new(EquipmentStore::new());
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_SIZE);

        let fetcher = Fetcher::new(
            Arc::clone(&source),
            Arc::clone(&store),
            config.failure_policy,
            notices.clone(),
        );
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&store),
            fetcher,
            config.active_types.clone(),
        ));
        let listener = Listener::new(
            Arc::clone(&store),
            Arc::clone(&source),
            config.study,
            config.root_network,
        );

        Self {
            inner: Arc::new(SessionInner {
                config,
                source,
                store,
                coordinator,
                listener,
                resolver: BuiltNodesResolver::new(),
                tree: watch::channel(Arc::new(Vec::new())).0,
                aliases: watch::channel(None).0,
                selected: watch::channel(None).0,
                desired: watch::channel(Arc::new(BTreeSet::new())).0,
                notices,
                status: watch::channel(SessionStatus::Idle).0,
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<EquipmentStore> {
        &self.inner.store
    }

    pub fn source(&self) -> &Arc<S> {
        &self.inner.source
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Load the tree and aliases, then spawn the coordinator and (when
    /// the source has one) the notification listener.
    pub async fn start(&self) -> Result<(), CoreError> {
        self.inner.status.send_replace(SessionStatus::Starting);

        if let Err(e) = self.prime().await {
            self.inner.status.send_replace(SessionStatus::Failed);
            return Err(e);
        }

        let notifications = match self.inner.source.notifications(self.inner.cancel.child_token()) {
            Ok(rx) => rx,
            Err(e) => {
                self.inner.status.send_replace(SessionStatus::Failed);
                return Err(e);
            }
        };

        let mut handles = self.inner.task_handles.lock().await;
        handles.push(tokio::spawn(Arc::clone(&self.inner.coordinator).run(
            self.inner.desired.subscribe(),
            self.inner.cancel.clone(),
        )));
        if let Some(rx) = notifications {
            handles.push(tokio::spawn(listener_task(
                self.clone(),
                rx,
                self.inner.cancel.clone(),
            )));
        }

        self.inner.status.send_replace(SessionStatus::Running);
        info!(study = %self.inner.config.study, "session started");
        Ok(())
    }

    /// Fetch the tree (required) and the aliases (best effort).
    pub async fn prime(&self) -> Result<(), CoreError> {
        self.refresh_tree().await?;
        if let Err(e) = self.refresh_aliases().await {
            debug!(error = %e, "continuing without aliases");
        }
        Ok(())
    }

    /// Reconcile in the foreground until nothing is left to do.
    pub async fn settle(&self) {
        for _ in 0..SETTLE_MAX_PASSES {
            let desired = self.desired_nodes();
            let report = self.inner.coordinator.reconcile(&desired);
            if report.is_noop() {
                return;
            }
            report.join().await;
        }
        debug!("cache still moving after {SETTLE_MAX_PASSES} passes");
    }

    /// Cancel background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        self.inner.status.send_replace(SessionStatus::Stopped);
        debug!("session stopped");
    }

    // ── Inputs ───────────────────────────────────────────────────────

    /// Change the node the user is looking at.
    pub fn select_node(&self, node: Option<NodeId>) {
        self.inner.selected.send_replace(node);
        self.recompute_desired();
    }

    pub async fn refresh_tree(&self) -> Result<(), CoreError> {
        match self.inner.source.tree().await {
            Ok(nodes) => {
                debug!(nodes = nodes.len(), "tree refreshed");
                self.inner.tree.send_replace(Arc::new(nodes));
                self.recompute_desired();
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "tree fetch failed");
                self.notify(UserNotice::new(TREE_FETCH_ERROR, e.to_string()));
                Err(e)
            }
        }
    }

    /// Refetch aliases. On failure the alias list becomes unknown.
    pub async fn refresh_aliases(&self) -> Result<(), CoreError> {
        let result = self.inner.source.node_aliases().await;
        let outcome = match result {
            Ok(aliases) => {
                debug!(aliases = aliases.len(), "aliases refreshed");
                self.inner.aliases.send_replace(Some(Arc::new(aliases)));
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "alias fetch failed");
                self.notify(UserNotice::new(NODE_ALIASES_FETCH_ERROR, e.to_string()));
                self.inner.aliases.send_replace(None);
                Err(e)
            }
        };
        self.recompute_desired();
        outcome
    }

    pub fn set_active_types(&self, types: BTreeSet<EquipmentType>) {
        self.inner.coordinator.set_active_types(types);
    }

    pub fn request_optional_fields(&self, equipment_type: EquipmentType, load: bool) {
        self.inner
            .coordinator
            .request_optional_fields(equipment_type, load);
    }

    /// Fetch again every node whose fetch failed.
    pub fn retry_failed(&self) {
        self.inner.coordinator.retry_failed();
    }

    /// Apply one notification event and run the follow-ups it asks for.
    pub async fn handle_event(&self, event: &StudyEvent) {
        let aliases = self.aliases();
        let followups = self
            .inner
            .listener
            .handle(event, aliases.as_deref().map(Vec::as_slice))
            .await;

        if followups.refetch_tree {
            if let Err(e) = self.refresh_tree().await {
                debug!(error = %e, "tree refetch after notification failed");
            }
        }
        if followups.refetch_aliases {
            if let Err(e) = self.refresh_aliases().await {
                debug!(error = %e, "alias refetch after notification failed");
            }
        }
    }

    /// Recompute the desired set and publish it if membership changed.
    fn recompute_desired(&self) {
        let inner = &self.inner;
        inner.desired.send_if_modified(|current| {
            let tree = inner.tree.borrow().clone();
            let aliases = inner.aliases.borrow().clone();
            let selected = *inner.selected.borrow();

            let next = inner
                .resolver
                .resolve(selected, aliases.as_deref().map(Vec::as_slice), &tree);
            if Arc::ptr_eq(current, &next) {
                return false;
            }
            debug!(nodes = next.len(), "desired node set changed");
            *current = next;
            true
        });
    }

    fn notify(&self, notice: UserNotice) {
        let _ = self.inner.notices.send(notice);
    }

    // ── State observation ────────────────────────────────────────────

    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<UserNotice> {
        self.inner.notices.subscribe()
    }

    pub fn snapshot(&self) -> Arc<EquipmentState> {
        self.inner.store.snapshot()
    }

    pub fn subscribe(&self) -> StateStream<EquipmentState> {
        self.inner.store.subscribe()
    }

    pub fn desired_nodes(&self) -> Arc<BTreeSet<NodeId>> {
        self.inner.desired.borrow().clone()
    }

    pub fn subscribe_desired(&self) -> StateStream<BTreeSet<NodeId>> {
        StateStream::new(self.inner.desired.subscribe())
    }

    pub fn tree(&self) -> Arc<Vec<TreeNode>> {
        self.inner.tree.borrow().clone()
    }

    pub fn aliases(&self) -> Option<Arc<Vec<NodeAlias>>> {
        self.inner.aliases.borrow().clone()
    }

    pub fn selected(&self) -> Option<NodeId> {
        *self.inner.selected.borrow()
    }

    pub fn active_types(&self) -> Arc<BTreeSet<EquipmentType>> {
        self.inner.coordinator.active_types()
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Feed notification events to the session until cancelled.
async fn listener_task<S: StudySource>(
    session: Session<S>,
    mut rx: broadcast::Receiver<Arc<StudyEvent>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Ok(event) => session.handle_event(&event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notifications dropped, resetting cache");
                    session.store().reset_equipments();
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("listener stopped");
}
