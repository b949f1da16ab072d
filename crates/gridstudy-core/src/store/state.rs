// ── Equipment cache state ──
//
// Immutable snapshots of the cache plus the actions that transition
// between them. `EquipmentState::apply` is pure: it consumes the old
// state and returns the next one, so published snapshots never change.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use strum::IntoStaticStr;

use crate::config::FailurePolicy;
use crate::model::{EquipmentRecord, EquipmentType, NodeId};

/// Cached data and bookkeeping for one equipment type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeCache {
    pub(crate) loaded_node_ids: BTreeSet<NodeId>,
    pub(crate) equipments_by_node_id: BTreeMap<NodeId, Arc<Vec<EquipmentRecord>>>,
    /// Nodes whose fetch failed for this type since the last reset.
    pub(crate) failed_node_ids: BTreeSet<NodeId>,
    /// In-flight fetch tasks for this type.
    pub(crate) fetching: usize,
    /// Whether the loaded set was last fully (re)loaded with optional fields.
    pub(crate) optional_fields: bool,
    /// Bumped whenever the type's data is reset; fetches started under an
    /// older generation are discarded on arrival.
    pub(crate) generation: u64,
    /// Sequence number of the last fetch started for this type.
    pub(crate) fetch_seq: u64,
    /// Nodes removed while a fetch was in flight, with the sequence current
    /// at removal. Fetches started at or before it drop those nodes.
    pub(crate) removed_at: BTreeMap<NodeId, u64>,
}

impl TypeCache {
    pub fn loaded_node_ids(&self) -> &BTreeSet<NodeId> {
        &self.loaded_node_ids
    }

    pub fn failed_node_ids(&self) -> &BTreeSet<NodeId> {
        &self.failed_node_ids
    }

    pub fn equipments(&self, node: &NodeId) -> Option<&[EquipmentRecord]> {
        self.equipments_by_node_id.get(node).map(|v| v.as_slice())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&NodeId, &[EquipmentRecord])> {
        self.equipments_by_node_id
            .iter()
            .map(|(node, records)| (node, records.as_slice()))
    }

    pub fn is_fetching(&self) -> bool {
        self.fetching > 0
    }

    pub fn optional_fields(&self) -> bool {
        self.optional_fields
    }

    pub fn record_count(&self) -> usize {
        self.equipments_by_node_id.values().map(|v| v.len()).sum()
    }

    /// Every node this type holds anything about.
    pub(crate) fn tracked_node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.loaded_node_ids
            .iter()
            .chain(self.equipments_by_node_id.keys())
            .chain(self.failed_node_ids.iter())
    }

    fn clear_data(&mut self) {
        self.loaded_node_ids.clear();
        self.equipments_by_node_id.clear();
        self.failed_node_ids.clear();
        self.removed_at.clear();
        self.generation += 1;
    }

    fn ticket(&self) -> FetchTicket {
        FetchTicket {
            generation: self.generation,
            seq: self.fetch_seq,
        }
    }

    /// Whether `node` was removed after the fetch `seq` started.
    fn removed_since(&self, node: &NodeId, seq: u64) -> bool {
        self.removed_at.get(node).is_some_and(|at| *at >= seq)
    }

    fn load(&mut self, entries: BTreeMap<NodeId, Vec<EquipmentRecord>>) {
        for (node, records) in entries {
            self.loaded_node_ids.insert(node);
            self.equipments_by_node_id.insert(node, Arc::new(records));
        }
    }
}

/// Identifies one fetch so its commit can be checked against resets and
/// removals that happened while it was in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchTicket {
    pub generation: u64,
    pub seq: u64,
}

/// A committed state of the whole cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EquipmentState {
    pub(crate) types: BTreeMap<EquipmentType, TypeCache>,
    pub(crate) loaded_node_ids: BTreeSet<NodeId>,
    pub(crate) failed_node_ids: BTreeSet<NodeId>,
    pub(crate) reset_epoch: u64,
}

/// A state transition. Dispatched through [`super::EquipmentStore`].
#[derive(Debug, Clone, IntoStaticStr)]
pub enum StoreAction {
    /// Merge node entries for a type and mark them loaded for it.
    Load {
        equipment_type: EquipmentType,
        entries: BTreeMap<NodeId, Vec<EquipmentRecord>>,
    },
    /// Drop a type's entries, marks and failures for some nodes.
    RemoveNodeData {
        equipment_type: EquipmentType,
        node_ids: BTreeSet<NodeId>,
    },
    /// Upsert records by id in a node's list; no-op without an entry.
    UpdateEquipments {
        equipment_type: EquipmentType,
        node_id: NodeId,
        records: Vec<EquipmentRecord>,
    },
    /// Remove records by id from a node's list.
    DeleteEquipments {
        equipment_type: EquipmentType,
        node_id: NodeId,
        ids: Vec<String>,
    },
    /// Clear everything and bump the reset epoch.
    ResetEquipments,
    /// Clear the given types only; the global loaded set is kept.
    ResetEquipmentsByTypes(BTreeSet<EquipmentType>),
    MarkLoaded(BTreeSet<NodeId>),
    UnmarkLoaded(BTreeSet<NodeId>),
    MarkFailed(BTreeSet<NodeId>),
    ClearFailed(BTreeSet<NodeId>),
    /// Forget every recorded failure, global and per type.
    ClearAllFailures,
    SetOptionalFields {
        equipment_type: EquipmentType,
        loaded: bool,
    },
    FetchStarted {
        equipment_type: EquipmentType,
    },
    /// Commit one fetch: load the successes, record the failures, and
    /// release the type's fetching count, all in one step.
    FetchFinished {
        equipment_type: EquipmentType,
        ticket: FetchTicket,
        entries: BTreeMap<NodeId, Vec<EquipmentRecord>>,
        failed: BTreeSet<NodeId>,
        policy: FailurePolicy,
        /// `Some` when the fetch reloaded the full desired set.
        optional_fields: Option<bool>,
    },
}

impl StoreAction {
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

impl EquipmentState {
    // ── Accessors ────────────────────────────────────────────────────

    pub fn loaded_node_ids(&self) -> &BTreeSet<NodeId> {
        &self.loaded_node_ids
    }

    pub fn failed_node_ids(&self) -> &BTreeSet<NodeId> {
        &self.failed_node_ids
    }

    pub fn reset_epoch(&self) -> u64 {
        self.reset_epoch
    }

    pub fn type_cache(&self, equipment_type: EquipmentType) -> Option<&TypeCache> {
        self.types.get(&equipment_type)
    }

    pub fn types(&self) -> impl Iterator<Item = (EquipmentType, &TypeCache)> {
        self.types.iter().map(|(ty, cache)| (*ty, cache))
    }

    pub fn equipments(&self, equipment_type: EquipmentType, node: &NodeId) -> Option<&[EquipmentRecord]> {
        self.type_cache(equipment_type)?.equipments(node)
    }

    pub fn is_fetching(&self, equipment_type: EquipmentType) -> bool {
        self.type_cache(equipment_type).is_some_and(TypeCache::is_fetching)
    }

    /// Whether any type holds an entry for `node`.
    pub fn has_entries_for(&self, node: &NodeId) -> bool {
        self.types
            .values()
            .any(|cache| cache.equipments_by_node_id.contains_key(node))
    }

    /// Every node the cache holds anything about, globally or per type.
    pub fn tracked_node_ids(&self) -> BTreeSet<NodeId> {
        self.loaded_node_ids
            .iter()
            .chain(self.failed_node_ids.iter())
            .chain(self.types.values().flat_map(TypeCache::tracked_node_ids))
            .copied()
            .collect()
    }

    pub(crate) fn ticket(&self, equipment_type: EquipmentType) -> FetchTicket {
        self.type_cache(equipment_type)
            .map_or_else(FetchTicket::default, TypeCache::ticket)
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Apply one action, returning the next state.
    pub fn apply(mut self, action: StoreAction) -> Self {
        match action {
            StoreAction::Load {
                equipment_type,
                entries,
            } => {
                self.types.entry(equipment_type).or_default().load(entries);
            }
            StoreAction::RemoveNodeData {
                equipment_type,
                node_ids,
            } => {
                if let Some(cache) = self.types.get_mut(&equipment_type) {
                    for node in &node_ids {
                        cache.equipments_by_node_id.remove(node);
                        cache.loaded_node_ids.remove(node);
                        cache.failed_node_ids.remove(node);
                        if cache.fetching > 0 {
                            cache.removed_at.insert(*node, cache.fetch_seq);
                        }
                    }
                }
            }
            StoreAction::UpdateEquipments {
                equipment_type,
                node_id,
                records,
            } => {
                let entry = self
                    .types
                    .get_mut(&equipment_type)
                    .and_then(|cache| cache.equipments_by_node_id.get_mut(&node_id));
                if let Some(entry) = entry {
                    upsert(Arc::make_mut(entry), records);
                }
            }
            StoreAction::DeleteEquipments {
                equipment_type,
                node_id,
                ids,
            } => {
                let entry = self
                    .types
                    .get_mut(&equipment_type)
                    .and_then(|cache| cache.equipments_by_node_id.get_mut(&node_id));
                if let Some(entry) = entry {
                    if entry.iter().any(|r| ids.contains(&r.id)) {
                        Arc::make_mut(entry).retain(|r| !ids.contains(&r.id));
                    }
                }
            }
            StoreAction::ResetEquipments => {
                for cache in self.types.values_mut() {
                    cache.clear_data();
                }
                self.loaded_node_ids.clear();
                self.failed_node_ids.clear();
                self.reset_epoch += 1;
            }
            StoreAction::ResetEquipmentsByTypes(types) => {
                for ty in types {
                    if let Some(cache) = self.types.get_mut(&ty) {
                        cache.clear_data();
                    }
                }
            }
            StoreAction::MarkLoaded(nodes) => self.loaded_node_ids.extend(nodes),
            StoreAction::UnmarkLoaded(nodes) => {
                self.loaded_node_ids.retain(|n| !nodes.contains(n));
            }
            StoreAction::MarkFailed(nodes) => self.failed_node_ids.extend(nodes),
            StoreAction::ClearFailed(nodes) => {
                self.failed_node_ids.retain(|n| !nodes.contains(n));
            }
            StoreAction::ClearAllFailures => {
                self.failed_node_ids.clear();
                for cache in self.types.values_mut() {
                    cache.failed_node_ids.clear();
                }
            }
            StoreAction::SetOptionalFields {
                equipment_type,
                loaded,
            } => {
                self.types.entry(equipment_type).or_default().optional_fields = loaded;
            }
            StoreAction::FetchStarted { equipment_type } => {
                let cache = self.types.entry(equipment_type).or_default();
                cache.fetching += 1;
                cache.fetch_seq += 1;
            }
            StoreAction::FetchFinished {
                equipment_type,
                ticket,
                mut entries,
                mut failed,
                policy,
                optional_fields,
            } => {
                let cache = self.types.entry(equipment_type).or_default();
                cache.fetching = cache.fetching.saturating_sub(1);
                if cache.generation != ticket.generation {
                    return self;
                }

                entries.retain(|node, _| !cache.removed_since(node, ticket.seq));
                failed.retain(|node| !cache.removed_since(node, ticket.seq));
                if cache.fetching == 0 {
                    cache.removed_at.clear();
                }

                cache.load(entries);
                cache.failed_node_ids.extend(failed.iter().copied());
                if let Some(loaded) = optional_fields {
                    cache.optional_fields = loaded;
                }

                if policy == FailurePolicy::RollBack && !failed.is_empty() {
                    self.loaded_node_ids.retain(|n| !failed.contains(n));
                    self.failed_node_ids.extend(failed);
                }
            }
        }
        self
    }
}

/// Replace records with a known id in place, append the rest.
fn upsert(list: &mut Vec<EquipmentRecord>, records: Vec<EquipmentRecord>) {
    for record in records {
        match list.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => list.push(record),
        }
    }
}
