//! Per (collection, replication class) volume registry
//!
//! A layout owns:
//! - the volume id → replica set mapping
//! - the writable set consulted by write routing
//! - per (volume, node) availability flags consulted by read routing
//!
//! All state sits behind one mutex. Critical sections are short and never
//! span a network call; the vacuum protocol reads a snapshot of the replica
//! sets and only comes back here to flip flags.

use crate::common::{Error, Result};
use crate::coordinator::replica_set::ReplicaSet;
use crate::coordinator::types::{NodeEndpoint, ReplicationClass, VolumeId};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

#[derive(Debug, Default)]
struct LayoutState {
    locations: BTreeMap<VolumeId, ReplicaSet>,
    writables: BTreeSet<VolumeId>,
    /// Replicas hidden from routing. Absent means available.
    unavailable: HashSet<(VolumeId, NodeEndpoint)>,
}

#[derive(Debug)]
pub struct VolumeLayout {
    collection: String,
    replication: ReplicationClass,
    state: Mutex<LayoutState>,
}

/// Read-only view of one volume, used by status reporting
#[derive(Debug, Clone, Serialize)]
pub struct VolumeView {
    pub volume: VolumeId,
    pub replicas: ReplicaSet,
    pub writable: bool,
    pub available_nodes: Vec<NodeEndpoint>,
    pub under_replicated: bool,
}

impl VolumeLayout {
    pub fn new(collection: impl Into<String>, replication: ReplicationClass) -> Self {
        Self {
            collection: collection.into(),
            replication,
            state: Mutex::new(LayoutState::default()),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn replication(&self) -> ReplicationClass {
        self.replication
    }

    /// `collection/replication`, used in logs and conflict errors
    pub fn name(&self) -> String {
        format!("{}/{}", self.collection, self.replication)
    }

    // === Membership (driven by the external cluster view) ===

    /// Record a volume and its replicas. Replaces any previous replica set.
    pub fn register(&self, vid: VolumeId, replicas: ReplicaSet, writable: bool) -> Result<()> {
        if replicas.is_empty() {
            return Err(Error::EmptyReplicaSet(vid));
        }

        let mut state = self.state.lock();
        if let Some(previous) = state.locations.get(&vid) {
            let dropped: Vec<NodeEndpoint> = previous
                .iter()
                .filter(|n| !replicas.contains(n))
                .cloned()
                .collect();
            for node in dropped {
                state.unavailable.remove(&(vid, node));
            }
        }
        state.locations.insert(vid, replicas);
        if writable {
            state.writables.insert(vid);
        }
        Ok(())
    }

    /// Forget a volume entirely
    pub fn unregister(&self, vid: VolumeId) -> Option<ReplicaSet> {
        let mut state = self.state.lock();
        state.writables.remove(&vid);
        state.unavailable.retain(|(v, _)| *v != vid);
        state.locations.remove(&vid)
    }

    // === Vacuum side effects ===

    /// Remove a volume from the writable set, returns true if it was writable
    pub fn remove_from_writable(&self, vid: VolumeId) -> bool {
        let removed = self.state.lock().writables.remove(&vid);
        if removed {
            tracing::debug!(%vid, layout = %self.name(), "Volume removed from writable set");
        }
        removed
    }

    pub fn set_volume_unavailable(&self, vid: VolumeId, node: &NodeEndpoint) {
        self.state.lock().unavailable.insert((vid, node.clone()));
    }

    pub fn set_volume_available(&self, vid: VolumeId, node: &NodeEndpoint) {
        self.state.lock().unavailable.remove(&(vid, node.clone()));
    }

    // === Routing view ===

    pub fn contains(&self, vid: VolumeId) -> bool {
        self.state.lock().locations.contains_key(&vid)
    }

    pub fn replicas(&self, vid: VolumeId) -> Option<ReplicaSet> {
        self.state.lock().locations.get(&vid).cloned()
    }

    pub fn is_writable(&self, vid: VolumeId) -> bool {
        self.state.lock().writables.contains(&vid)
    }

    pub fn writable_volumes(&self) -> Vec<VolumeId> {
        self.state.lock().writables.iter().copied().collect()
    }

    pub fn is_available(&self, vid: VolumeId, node: &NodeEndpoint) -> bool {
        let state = self.state.lock();
        state
            .locations
            .get(&vid)
            .is_some_and(|r| r.contains(node))
            && !state.unavailable.contains(&(vid, node.clone()))
    }

    /// Replicas of `vid` that reads may be routed to
    pub fn available_nodes(&self, vid: VolumeId) -> Vec<NodeEndpoint> {
        let state = self.state.lock();
        match state.locations.get(&vid) {
            Some(replicas) => replicas
                .iter()
                .filter(|n| !state.unavailable.contains(&(vid, (*n).clone())))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Immutable copy of the volume → replica set mapping
    pub fn snapshot(&self) -> Vec<(VolumeId, ReplicaSet)> {
        self.state
            .lock()
            .locations
            .iter()
            .map(|(vid, replicas)| (*vid, replicas.clone()))
            .collect()
    }

    pub fn volume_views(&self) -> Vec<VolumeView> {
        let copies = self.replication.copy_count();
        let state = self.state.lock();
        state
            .locations
            .iter()
            .map(|(vid, replicas)| VolumeView {
                volume: *vid,
                replicas: replicas.clone(),
                writable: state.writables.contains(vid),
                available_nodes: replicas
                    .iter()
                    .filter(|n| !state.unavailable.contains(&(*vid, (*n).clone())))
                    .cloned()
                    .collect(),
                under_replicated: replicas.len() < copies,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
