// Equipment endpoints
//
// Per-node, per-type element listing (the spreadsheet's bulk load) and
// the all-types-by-substation listing used after a network impact.

use tracing::debug;
use uuid::Uuid;

use crate::client::StudyClient;
use crate::error::Error;
use crate::models::RawEquipmentsByType;

impl StudyClient {
    /// List all elements of one type at one node, in tabular form.
    ///
    /// `GET .../nodes/{node}/network/elements?elementType={type}&infoType=TAB`
    ///
    /// `optional_fields` asks the server for the extra attributes some
    /// spreadsheet columns need (operational limit groups and the like).
    pub async fn list_equipments(
        &self,
        node: Uuid,
        element_type: &str,
        optional_fields: bool,
    ) -> Result<Vec<serde_json::Value>, Error> {
        let mut url = self.node_url(node, "network/elements")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("elementType", element_type)
                .append_pair("infoType", "TAB");
            if optional_fields {
                query.append_pair("loadOptionalFields", "true");
            }
        }
        debug!(%node, element_type, optional_fields, "listing equipments");
        self.get(url).await
    }

    /// List every element of every type located in the given substations.
    ///
    /// `GET .../nodes/{node}/network/all?substationsIds=..&substationsIds=..`
    pub async fn list_substations_equipments(
        &self,
        node: Uuid,
        substation_ids: &[String],
    ) -> Result<RawEquipmentsByType, Error> {
        let mut url = self.node_url(node, "network/all")?;
        {
            let mut query = url.query_pairs_mut();
            for id in substation_ids {
                query.append_pair("substationsIds", id);
            }
        }
        debug!(%node, substations = substation_ids.len(), "listing substation equipments");
        self.get(url).await
    }
}
