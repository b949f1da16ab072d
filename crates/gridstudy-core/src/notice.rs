// ── User notices ──
//
// Failures the user should hear about. Keyed by a translation header id
// so a front end can localize them.

use serde::Serialize;

pub const EQUIPMENTS_FETCH_ERROR: &str = "spreadsheet.equipmentsFetchError";
pub const NODE_ALIASES_FETCH_ERROR: &str = "spreadsheet.nodeAliasesFetchError";
pub const TREE_FETCH_ERROR: &str = "spreadsheet.treeFetchError";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserNotice {
    pub header_id: &'static str,
    pub message: String,
}

impl UserNotice {
    pub fn new(header_id: &'static str, message: impl Into<String>) -> Self {
        Self {
            header_id,
            message: message.into(),
        }
    }
}
