// Study service HTTP client
//
// Wraps `reqwest::Client` with study-scoped URL construction and status
// handling. Endpoint groups (equipments, tree, aliases) are implemented
// as inherent methods in separate files to keep this module focused on
// transport mechanics.

use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;
use uuid::Uuid;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Raw HTTP client for one study and one root network.
///
/// Every method returns decoded payloads; non-success statuses become
/// [`Error::Http`] with the response body as message.
pub struct StudyClient {
    http: reqwest::Client,
    base_url: Url,
    study: Uuid,
    root_network: Uuid,
}

impl StudyClient {
    /// Create a client from a `TransportConfig`.
    ///
    /// `base_url` is the study service gateway root, e.g.
    /// `https://grid.example.org/api/gateway/study`.
    pub fn new(
        base_url: Url,
        study: Uuid,
        root_network: Uuid,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url, study, root_network))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url, study: Uuid, root_network: Uuid) -> Self {
        Self {
            http,
            base_url,
            study,
            root_network,
        }
    }

    pub fn study(&self) -> Uuid {
        self.study
    }

    pub fn root_network(&self) -> Uuid {
        self.root_network
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build a study-scoped URL: `{base}/v1/studies/{study}/{path}`
    pub(crate) fn study_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let full = format!("{base}/v1/studies/{}/{path}", self.study);
        Ok(Url::parse(&full)?)
    }

    /// Build a node-scoped URL:
    /// `{base}/v1/studies/{study}/root-networks/{rootNetwork}/nodes/{node}/{path}`
    pub(crate) fn node_url(&self, node: Uuid, path: &str) -> Result<Url, Error> {
        self.study_url(&format!(
            "root-networks/{}/nodes/{node}/{path}",
            self.root_network
        ))
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Send a GET request and decode the JSON body.
    pub(crate) async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);

        let resp = self.http.get(url).send().await.map_err(Error::Transport)?;
        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;

        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                message: if body.is_empty() {
                    status.canonical_reason().unwrap_or("unknown").to_owned()
                } else {
                    body
                },
            });
        }

        trace!(bytes = body.len(), "response body received");
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client() -> StudyClient {
        StudyClient::with_client(
            reqwest::Client::new(),
            Url::parse("https://grid.example.org/study/").unwrap(),
            Uuid::nil(),
            Uuid::from_u128(u128::MAX),
        )
    }

    #[test]
    fn study_url_trims_trailing_slash() {
        let url = client().study_url("tree").unwrap();
        assert_eq!(
            url.as_str(),
            "https://grid.example.org/study/v1/studies/00000000-0000-0000-0000-000000000000/tree"
        );
    }

    #[test]
    fn node_url_is_root_network_scoped() {
        let node = Uuid::parse_str("22222222-2222-2222-2222-222222222222").unwrap();
        let url = client().node_url(node, "network/elements").unwrap();
        assert!(url.path().ends_with(
            "/root-networks/ffffffff-ffff-ffff-ffff-ffffffffffff/nodes/22222222-2222-2222-2222-222222222222/network/elements"
        ));
    }
}
