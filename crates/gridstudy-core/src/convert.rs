// ── API-to-domain type conversions ──
//
// Bridges raw `gridstudy_api` payloads into canonical
// `gridstudy_core::model` types. Tree nodes are flattened, aliases get
// strong ids, and raw equipment objects go through a per-type mapper
// that derives the display attributes the spreadsheet columns read.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use gridstudy_api::models::{RawEquipmentsByType, RawNodeAlias, RawTreeNode};

use crate::model::{
    BuildStatus, EquipmentRecord, EquipmentType, NodeAlias, NodeId, NodeType, TreeNode,
};

// ── Tree ───────────────────────────────────────────────────────────

/// Flatten the nested tree depth-first, parents before children.
pub fn flatten_tree(root: RawTreeNode) -> Vec<TreeNode> {
    let mut nodes = Vec::new();
    let mut stack = vec![(root, None)];

    while let Some((raw, parent)) = stack.pop() {
        let id: NodeId = raw.id.into();
        let build_status = raw
            .node_build_status
            .and_then(|s| s.global_build_status)
            .map(BuildStatus::from)
            .unwrap_or_default();

        nodes.push(TreeNode {
            id,
            name: raw.name,
            node_type: NodeType::from_tag(&raw.node_type),
            build_status,
            parent,
        });

        // Reverse so the first child is visited first.
        stack.extend(raw.children.into_iter().rev().map(|c| (c, Some(id))));
    }

    nodes
}

// ── Aliases ────────────────────────────────────────────────────────

impl From<RawNodeAlias> for NodeAlias {
    fn from(raw: RawNodeAlias) -> Self {
        Self {
            id: raw.id.map(Into::into),
            name: raw.name,
            alias: raw.alias,
        }
    }
}

// ── Equipment ──────────────────────────────────────────────────────

/// Normalize one node's raw equipment list for `equipment_type`.
///
/// Objects without a string `id` are dropped with a warning.
pub fn normalize_records(equipment_type: EquipmentType, raw: Vec<Value>) -> Vec<EquipmentRecord> {
    raw.into_iter()
        .filter_map(|value| to_record(equipment_type, value))
        .collect()
}

/// Normalize an all-types response, skipping type tags the cache ignores.
pub fn normalize_by_type(raw: RawEquipmentsByType) -> BTreeMap<EquipmentType, Vec<EquipmentRecord>> {
    raw.into_iter()
        .filter_map(|(tag, values)| {
            EquipmentType::from_tag(&tag).map(|ty| (ty, normalize_records(ty, values)))
        })
        .collect()
}

fn to_record(equipment_type: EquipmentType, value: Value) -> Option<EquipmentRecord> {
    let Value::Object(map) = value else {
        warn!(%equipment_type, "dropping non-object equipment entry");
        return None;
    };

    let mut attributes: IndexMap<String, Value> = map.into_iter().collect();
    let id = match attributes.shift_remove("id") {
        Some(Value::String(id)) => id,
        other => {
            warn!(%equipment_type, id = ?other, "dropping equipment without string id");
            return None;
        }
    };

    match equipment_type {
        ty if ty.is_branch() => derive_branch_limits(&mut attributes),
        EquipmentType::Generator | EquipmentType::Battery => {
            derive_regulating_terminal(&mut attributes);
        }
        _ => {}
    }

    Some(EquipmentRecord { id, attributes })
}

/// Expose each side's permanent current limit as a top-level column.
fn derive_branch_limits(attributes: &mut IndexMap<String, Value>) {
    for side in ["1", "2"] {
        let limit = attributes
            .get(&format!("currentLimits{side}"))
            .and_then(|limits| limits.get("permanentLimit"))
            .cloned();
        if let Some(limit) = limit {
            attributes.insert(format!("permanentLimit{side}"), limit);
        }
    }
}

/// Render a remote regulating terminal as `"<equipment> (<voltage level>)"`.
fn derive_regulating_terminal(attributes: &mut IndexMap<String, Value>) {
    let connectable = attributes
        .get("regulatingTerminalConnectableId")
        .and_then(Value::as_str);
    let voltage_level = attributes
        .get("regulatingTerminalVlId")
        .and_then(Value::as_str);

    if let (Some(connectable), Some(voltage_level)) = (connectable, voltage_level) {
        let rendered = format!("{connectable} ({voltage_level})");
        attributes.insert("regulatingTerminal".into(), Value::String(rendered));
    }
}
