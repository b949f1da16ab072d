// Wire types for the study service.
//
// These mirror the JSON the server sends, nothing more. Canonical
// domain types live in `gridstudy-core`, which converts from these.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One node of the modification tree, as returned by `GET .../tree`.
///
/// The server nests children recursively; `gridstudy-core` flattens it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTreeNode {
    pub id: Uuid,

    #[serde(default)]
    pub name: String,

    /// `"ROOT"` or `"NETWORK_MODIFICATION"`.
    #[serde(rename = "type")]
    pub node_type: String,

    #[serde(default)]
    pub node_build_status: Option<RawNodeBuildStatus>,

    #[serde(default)]
    pub children: Vec<RawTreeNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNodeBuildStatus {
    #[serde(default)]
    pub global_build_status: Option<String>,

    #[serde(default)]
    pub local_build_status: Option<String>,
}

/// A user-defined alias pointing at a tree node.
///
/// Both `id` and `name` may be null when the alias was created but never
/// bound, or the node it pointed at was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawNodeAlias {
    #[serde(default)]
    pub id: Option<Uuid>,

    #[serde(default)]
    pub name: Option<String>,

    pub alias: String,
}

/// Response of the all-equipment endpoint: equipment type tag → raw objects.
pub type RawEquipmentsByType = BTreeMap<String, Vec<serde_json::Value>>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_nested_tree() {
        let json = serde_json::json!({
            "id": "11111111-1111-1111-1111-111111111111",
            "name": "Root",
            "type": "ROOT",
            "children": [{
                "id": "22222222-2222-2222-2222-222222222222",
                "name": "N1",
                "type": "NETWORK_MODIFICATION",
                "nodeBuildStatus": { "globalBuildStatus": "BUILT", "localBuildStatus": "BUILT" },
                "children": []
            }]
        });

        let root: RawTreeNode = serde_json::from_value(json).unwrap();
        assert_eq!(root.node_type, "ROOT");
        assert!(root.node_build_status.is_none());
        assert_eq!(root.children.len(), 1);
        assert_eq!(
            root.children[0]
                .node_build_status
                .as_ref()
                .unwrap()
                .global_build_status
                .as_deref(),
            Some("BUILT")
        );
    }

    #[test]
    fn deserialize_alias_with_nulls() {
        let alias: RawNodeAlias =
            serde_json::from_str(r#"{"id": null, "name": null, "alias": "base"}"#).unwrap();
        assert!(alias.id.is_none());
        assert!(alias.name.is_none());
        assert_eq!(alias.alias, "base");
    }
}
