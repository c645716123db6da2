//! Cluster topology: collections → volume layouts → volumes

use crate::common::{Error, Result};
use crate::coordinator::replica_set::ReplicaSet;
use crate::coordinator::types::{ReplicationClass, VolumeId};
use crate::coordinator::volume_layout::{VolumeLayout, VolumeView};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A named collection, owning one layout per replication class
#[derive(Debug, Default)]
pub struct Collection {
    layouts: BTreeMap<ReplicationClass, Arc<VolumeLayout>>,
}

impl Collection {
    pub fn layouts(&self) -> impl Iterator<Item = &Arc<VolumeLayout>> {
        self.layouts.values()
    }
}

/// One unit of vacuum work taken from a topology snapshot
#[derive(Debug, Clone)]
pub struct VolumeTask {
    pub layout: Arc<VolumeLayout>,
    pub vid: VolumeId,
    pub replicas: ReplicaSet,
}

#[derive(Debug, Serialize)]
pub struct LayoutStatus {
    pub collection: String,
    pub replication: ReplicationClass,
    pub volumes: Vec<VolumeView>,
}

#[derive(Debug, Default)]
pub struct Topology {
    collections: RwLock<BTreeMap<String, Collection>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the layout currently holding `vid`
    pub fn lookup(&self, vid: VolumeId) -> Option<Arc<VolumeLayout>> {
        self.collections
            .read()
            .values()
            .flat_map(|c| c.layouts.values())
            .find(|layout| layout.contains(vid))
            .cloned()
    }

    /// Register a volume location reported by the membership layer.
    ///
    /// A volume id may live in only one layout at a time.
    pub fn register_volume(
        &self,
        collection: &str,
        replication: ReplicationClass,
        vid: VolumeId,
        replicas: ReplicaSet,
        writable: bool,
    ) -> Result<Arc<VolumeLayout>> {
        let mut collections = self.collections.write();

        let conflict = collections
            .values()
            .flat_map(|c| c.layouts.values())
            .find(|l| {
                l.contains(vid) && (l.collection() != collection || l.replication() != replication)
            })
            .map(|l| l.name());
        if let Some(existing) = conflict {
            return Err(Error::VolumeInOtherLayout { vid, existing });
        }

        let layout = collections
            .entry(collection.to_string())
            .or_default()
            .layouts
            .entry(replication)
            .or_insert_with(|| Arc::new(VolumeLayout::new(collection, replication)))
            .clone();
        layout.register(vid, replicas, writable)?;
        drop(collections);

        tracing::info!(%vid, layout = %layout.name(), writable, "Registered volume");
        Ok(layout)
    }

    pub fn unregister_volume(&self, vid: VolumeId) -> Result<ReplicaSet> {
        let layout = self.lookup(vid).ok_or(Error::VolumeNotFound(vid))?;
        let replicas = layout.unregister(vid).ok_or(Error::VolumeNotFound(vid))?;
        tracing::info!(%vid, layout = %layout.name(), "Unregistered volume");
        Ok(replicas)
    }

    /// Immutable list of every volume in walk order.
    ///
    /// Locks are released before returning; later membership changes do not
    /// affect the returned tasks.
    pub fn snapshot(&self) -> Vec<VolumeTask> {
        let layouts: Vec<Arc<VolumeLayout>> = self
            .collections
            .read()
            .values()
            .flat_map(|c| c.layouts().cloned())
            .collect();

        layouts
            .into_iter()
            .flat_map(|layout| {
                layout
                    .snapshot()
                    .into_iter()
                    .map(move |(vid, replicas)| VolumeTask {
                        layout: layout.clone(),
                        vid,
                        replicas,
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    pub fn status(&self) -> Vec<LayoutStatus> {
        self.collections
            .read()
            .values()
            .flat_map(|c| c.layouts())
            .map(|layout| LayoutStatus {
                collection: layout.collection().to_string(),
                replication: layout.replication(),
                volumes: layout.volume_views(),
            })
            .collect()
    }

    pub fn volume_count(&self) -> usize {
        self.collections
            .read()
            .values()
            .flat_map(|c| c.layouts())
            .map(|layout| layout.len())
            .sum()
    }
}
