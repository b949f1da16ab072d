// ── Network impact notifications ──

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::EquipmentType;

/// Payload of a `study` notification: what a network modification did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkImpacts {
    #[serde(default)]
    pub impacted_substations_ids: Vec<String>,

    #[serde(default)]
    pub deleted_equipments: Vec<DeletedEquipment>,

    /// Element types whose whole collection may have changed.
    #[serde(default)]
    pub impacted_element_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedEquipment {
    pub equipment_type: String,
    pub equipment_id: String,
}

impl NetworkImpacts {
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Impacted element types this cache knows about.
    pub fn impacted_types(&self) -> BTreeSet<EquipmentType> {
        self.impacted_element_types
            .iter()
            .filter_map(|tag| EquipmentType::from_tag(tag))
            .collect()
    }

    /// Deleted equipment ids grouped by recognized type.
    pub fn deletions_by_type(&self) -> Vec<(EquipmentType, Vec<String>)> {
        let mut grouped: Vec<(EquipmentType, Vec<String>)> = Vec::new();
        for deleted in &self.deleted_equipments {
            let Some(ty) = EquipmentType::from_tag(&deleted.equipment_type) else {
                continue;
            };
            match grouped.iter_mut().find(|(t, _)| *t == ty) {
                Some((_, ids)) => ids.push(deleted.equipment_id.clone()),
                None => grouped.push((ty, vec![deleted.equipment_id.clone()])),
            }
        }
        grouped
    }
}
