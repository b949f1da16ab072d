// ── Study data source ──
//
// The seam between the cache and the study service. The coordinator,
// fetcher and listener only see `StudySource`; production code plugs in
// `HttpStudySource`, tests plug in in-memory fakes.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use gridstudy_api::websocket::{self, NotificationHandle, ReconnectConfig, StudyEvent};
use gridstudy_api::{StudyClient, TlsMode, TransportConfig};

use crate::config::{SessionConfig, TlsVerification};
use crate::convert;
use crate::error::CoreError;
use crate::model::{EquipmentRecord, EquipmentType, NodeAlias, NodeId, TreeNode};

/// Options for one equipment fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Ask for the optional attributes some spreadsheet columns need.
    pub optional_fields: bool,
}

/// Everything the cache needs from the study service.
pub trait StudySource: Send + Sync + 'static {
    /// Equipment of one type at one node, normalized.
    fn equipments(
        &self,
        equipment_type: EquipmentType,
        node: NodeId,
        options: FetchOptions,
    ) -> impl Future<Output = Result<Vec<EquipmentRecord>, CoreError>> + Send;

    /// Every equipment located in the given substations at one node.
    fn substations_equipments(
        &self,
        node: NodeId,
        substation_ids: &[String],
    ) -> impl Future<Output = Result<BTreeMap<EquipmentType, Vec<EquipmentRecord>>, CoreError>> + Send;

    /// The flattened modification tree.
    fn tree(&self) -> impl Future<Output = Result<Vec<TreeNode>, CoreError>> + Send;

    fn node_aliases(&self) -> impl Future<Output = Result<Vec<NodeAlias>, CoreError>> + Send;

    /// Start the push-notification stream, if this source has one.
    fn notifications(
        &self,
        _cancel: CancellationToken,
    ) -> Result<Option<broadcast::Receiver<Arc<StudyEvent>>>, CoreError> {
        Ok(None)
    }
}

// ── HTTP implementation ──────────────────────────────────────────────

/// `StudySource` backed by the study service REST API and its
/// notification WebSocket.
pub struct HttpStudySource {
    client: StudyClient,
    config: SessionConfig,
}

impl HttpStudySource {
    pub fn new(config: SessionConfig) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            tls: tls_to_transport(&config.tls),
            timeout: config.timeout,
            token: config.token.clone(),
        };
        let client = StudyClient::new(
            config.server_url.clone(),
            config.study,
            config.root_network,
            &transport,
        )?;
        Ok(Self { client, config })
    }
}

impl StudySource for HttpStudySource {
    async fn equipments(
        &self,
        equipment_type: EquipmentType,
        node: NodeId,
        options: FetchOptions,
    ) -> Result<Vec<EquipmentRecord>, CoreError> {
        let raw = self
            .client
            .list_equipments(node.into_uuid(), equipment_type.as_ref(), options.optional_fields)
            .await?;
        Ok(convert::normalize_records(equipment_type, raw))
    }

    async fn substations_equipments(
        &self,
        node: NodeId,
        substation_ids: &[String],
    ) -> Result<BTreeMap<EquipmentType, Vec<EquipmentRecord>>, CoreError> {
        let raw = self
            .client
            .list_substations_equipments(node.into_uuid(), substation_ids)
            .await?;
        Ok(convert::normalize_by_type(raw))
    }

    async fn tree(&self) -> Result<Vec<TreeNode>, CoreError> {
        let root = self.client.get_tree().await?;
        Ok(convert::flatten_tree(root))
    }

    async fn node_aliases(&self) -> Result<Vec<NodeAlias>, CoreError> {
        let raw = self.client.list_node_aliases().await?;
        Ok(raw.into_iter().map(NodeAlias::from).collect())
    }

    fn notifications(
        &self,
        cancel: CancellationToken,
    ) -> Result<Option<broadcast::Receiver<Arc<StudyEvent>>>, CoreError> {
        if !self.config.notifications_enabled {
            debug!("notifications disabled");
            return Ok(None);
        }

        let url = websocket::notification_url(
            &self.config.notify_url,
            self.config.study,
            self.config.token.as_ref(),
        )?;
        info!(study = %self.config.study, "starting notification stream");
        let handle = NotificationHandle::spawn(url, ReconnectConfig::default(), cancel);
        Ok(Some(handle.subscribe()))
    }
}

fn tls_to_transport(tls: &TlsVerification) -> TlsMode {
    match tls {
        TlsVerification::SystemDefaults => TlsMode::System,
        TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
        TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
    }
}
