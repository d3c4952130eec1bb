//! Node registry for cluster membership
//!
//! Active and inactive nodes live in one insertion-ordered map with a status
//! flag per entry. Moving a node between the two sets is a single field update
//! under one write lock, so a reader can never see a node in both sets or in
//! neither.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use url::Url;

use super::node::{NodeKey, NodeRecord};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct NodeEntry {
    record: NodeRecord,
    active: bool,
    /// When the entry last changed status
    since: DateTime<Utc>,
}

impl NodeEntry {
    fn new(record: NodeRecord, active: bool) -> Self {
        Self {
            record,
            active,
            since: Utc::now(),
        }
    }
}

/// Result of resolving a seed placeholder after its first successful probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The placeholder now lives under its identifier
    Resolved(NodeRecord),
    /// The identifier was already registered; the placeholder was dropped
    Merged(NodeRecord),
}

impl Resolution {
    #[must_use]
    pub const fn record(&self) -> &NodeRecord {
        match self {
            Self::Resolved(record) | Self::Merged(record) => record,
        }
    }
}

/// What `merge_member` did with a reported member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Unknown identifier, registered as active
    Added,
    /// Known identifier reported at a new address
    Relocated,
    Unchanged,
}

/// Point-in-time status of a registered node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub record: NodeRecord,
    pub active: bool,
    pub since: DateTime<Utc>,
}

/// In-memory registry of every known cluster member
///
/// Pure state container: no I/O, and every operation is a bounded critical
/// section. Snapshots are returned as owned copies.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<IndexMap<NodeKey, NodeEntry>>,
}

impl NodeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert records into the inactive set
    ///
    /// A record whose key is already registered replaces the stored address
    /// and hash but keeps the entry's current status.
    pub fn add<I>(&self, records: I)
    where
        I: IntoIterator<Item = NodeRecord>,
    {
        let mut nodes = self.nodes.write();
        for record in records {
            let key = record.key();
            match nodes.get_mut(&key) {
                Some(entry) => entry.record = record,
                None => {
                    tracing::debug!(node = %record, "Node added to registry");
                    nodes.insert(key, NodeEntry::new(record, false));
                }
            }
        }
    }

    /// Move records into the active set. Returns how many actually moved.
    pub fn activate<'a, I>(&self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a NodeRecord>,
    {
        self.set_status(records, true)
    }

    /// Move records into the inactive set. Returns how many actually moved.
    pub fn deactivate<'a, I>(&self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a NodeRecord>,
    {
        self.set_status(records, false)
    }

    /// All-or-nothing status change: if any record is unknown nothing moves.
    fn set_status<'a, I>(&self, records: I, active: bool) -> Result<usize>
    where
        I: IntoIterator<Item = &'a NodeRecord>,
    {
        let keys: Vec<NodeKey> = records.into_iter().map(NodeRecord::key).collect();

        let mut nodes = self.nodes.write();
        if let Some(missing) = keys.iter().find(|key| !nodes.contains_key(*key)) {
            tracing::error!(
                node = %missing,
                "Node is in neither the active nor the inactive set"
            );
            return Err(Error::InvariantViolation(format!(
                "node {missing} is not registered"
            )));
        }

        let now = Utc::now();
        let mut moved = 0;
        for key in &keys {
            if let Some(entry) = nodes.get_mut(key) {
                if entry.active != active {
                    entry.active = active;
                    entry.since = now;
                    moved += 1;
                    if active {
                        tracing::info!(node = %entry.record, "Node activated");
                    } else {
                        tracing::warn!(node = %entry.record, "Node deactivated");
                    }
                }
            }
        }

        Ok(moved)
    }

    /// Copy of the active set, in registration order
    #[must_use]
    pub fn list_active(&self) -> Vec<NodeRecord> {
        self.collect(true)
    }

    /// Copy of the inactive set, in registration order
    #[must_use]
    pub fn list_inactive(&self) -> Vec<NodeRecord> {
        self.collect(false)
    }

    fn collect(&self, active: bool) -> Vec<NodeRecord> {
        self.nodes
            .read()
            .values()
            .filter(|entry| entry.active == active)
            .map(|entry| entry.record.clone())
            .collect()
    }

    /// Active and inactive sets taken under one read lock
    #[must_use]
    pub fn partition(&self) -> (Vec<NodeRecord>, Vec<NodeRecord>) {
        let nodes = self.nodes.read();
        let mut active = Vec::new();
        let mut inactive = Vec::new();
        for entry in nodes.values() {
            if entry.active {
                active.push(entry.record.clone());
            } else {
                inactive.push(entry.record.clone());
            }
        }
        (active, inactive)
    }

    /// Full status of every registered node
    #[must_use]
    pub fn statuses(&self) -> Vec<NodeStatus> {
        self.nodes
            .read()
            .values()
            .map(|entry| NodeStatus {
                record: entry.record.clone(),
                active: entry.active,
                since: entry.since,
            })
            .collect()
    }

    /// Look up a resolved node by identifier
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<NodeRecord> {
        self.nodes
            .read()
            .get(&NodeKey::Identifier(identifier.to_string()))
            .map(|entry| entry.record.clone())
    }

    /// `Some(true)` when active, `Some(false)` when inactive, `None` if unknown
    #[must_use]
    pub fn is_active(&self, key: &NodeKey) -> Option<bool> {
        self.nodes.read().get(key).map(|entry| entry.active)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.nodes.read().values().filter(|entry| entry.active).count()
    }

    /// Give a seed placeholder the identity its probe reported
    ///
    /// The entry keeps its position and status. If another entry already owns
    /// `identifier`, the placeholder is discarded and that entry's hash is
    /// refreshed instead.
    pub fn resolve(
        &self,
        address: &Url,
        identifier: &str,
        topology_hash: Option<&str>,
    ) -> Result<Resolution> {
        let mut nodes = self.nodes.write();

        let Some((index, _, mut placeholder)) =
            nodes.shift_remove_full(&NodeKey::Address(address.clone()))
        else {
            return Err(Error::InvariantViolation(format!(
                "no unresolved entry registered for {address}"
            )));
        };

        let id_key = NodeKey::Identifier(identifier.to_string());
        if let Some(existing) = nodes.get_mut(&id_key) {
            if let Some(hash) = topology_hash {
                existing.record.topology_hash = Some(hash.to_string());
            }
            tracing::debug!(
                address = %address,
                node_id = %identifier,
                "Seed resolved to an already registered node"
            );
            return Ok(Resolution::Merged(existing.record.clone()));
        }

        placeholder.record.identifier = Some(identifier.to_string());
        placeholder.record.topology_hash = topology_hash.map(str::to_string);
        let record = placeholder.record.clone();
        nodes.shift_insert(index, id_key, placeholder);

        tracing::debug!(address = %address, node_id = %identifier, "Seed resolved");
        Ok(Resolution::Resolved(record))
    }

    /// Merge one member reported by a node's topology
    ///
    /// Unknown identifiers are registered as active, replacing any seed
    /// placeholder at the same address. Known identifiers reported at a
    /// different address get the new address and hash; their status is left
    /// alone.
    pub fn merge_member(
        &self,
        identifier: &str,
        address: &Url,
        topology_hash: Option<&str>,
    ) -> MergeOutcome {
        let mut nodes = self.nodes.write();
        let id_key = NodeKey::Identifier(identifier.to_string());

        if let Some(entry) = nodes.get_mut(&id_key) {
            if entry.record.address == *address {
                return MergeOutcome::Unchanged;
            }
            tracing::info!(
                node_id = %identifier,
                from = %entry.record.address,
                to = %address,
                "Node address changed"
            );
            entry.record.address = address.clone();
            entry.record.topology_hash = topology_hash.map(str::to_string);
            return MergeOutcome::Relocated;
        }

        nodes.shift_remove(&NodeKey::Address(address.clone()));
        let record = NodeRecord::resolved(
            address.clone(),
            identifier.to_string(),
            topology_hash.map(str::to_string),
        );
        tracing::info!(node = %record, "Discovered new node");
        nodes.insert(id_key, NodeEntry::new(record, true));
        MergeOutcome::Added
    }

    /// Record the topology hash a resolved node reported about itself
    pub fn update_topology_hash(&self, identifier: &str, topology_hash: &str) {
        let mut nodes = self.nodes.write();
        if let Some(entry) = nodes.get_mut(&NodeKey::Identifier(identifier.to_string())) {
            if entry.record.topology_hash.as_deref() != Some(topology_hash) {
                entry.record.topology_hash = Some(topology_hash.to_string());
            }
        }
    }

    /// Verify every entry is stored under its own key
    ///
    /// Keys are unique, so this also proves no identifier is registered twice.
    pub fn check_invariants(&self) -> Result<()> {
        let nodes = self.nodes.read();
        for (key, entry) in nodes.iter() {
            if *key != entry.record.key() {
                return Err(Error::InvariantViolation(format!(
                    "entry {} stored under key {key}",
                    entry.record
                )));
            }
        }
        Ok(())
    }
}
