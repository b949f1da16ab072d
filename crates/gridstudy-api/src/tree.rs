// Modification tree and node alias endpoints

use tracing::debug;

use crate::client::StudyClient;
use crate::error::Error;
use crate::models::{RawNodeAlias, RawTreeNode};

impl StudyClient {
    /// Fetch the whole modification tree, with build status for the
    /// client's root network.
    ///
    /// `GET /v1/studies/{study}/tree?rootNetworkUuid={rootNetwork}`
    pub async fn get_tree(&self) -> Result<RawTreeNode, Error> {
        let mut url = self.study_url("tree")?;
        url.query_pairs_mut()
            .append_pair("rootNetworkUuid", &self.root_network().to_string());
        debug!("fetching modification tree");
        self.get(url).await
    }

    /// Fetch the study's node aliases.
    ///
    /// `GET /v1/studies/{study}/node-aliases`
    pub async fn list_node_aliases(&self) -> Result<Vec<RawNodeAlias>, Error> {
        let url = self.study_url("node-aliases")?;
        debug!("listing node aliases");
        self.get(url).await
    }
}
