//! Vacuum coordinator
//!
//! The coordinator is responsible for:
//! - Tracking volume layouts (volume → replicas, writable set, availability)
//! - Running the check → compact → commit protocol on every replica set
//! - Scheduling whole-cluster sweeps
//! - Exposing the admin HTTP API

pub mod http;
pub mod replica_set;
pub mod server;
pub mod topology;
pub mod types;
pub mod vacuum;
pub mod volume_client;
pub mod volume_layout;

pub use replica_set::ReplicaSet;
pub use server::Coordinator;
pub use topology::Topology;
pub use types::{NodeEndpoint, ReplicationClass, VolumeId};
pub use vacuum::{SweepReport, VacuumCoordinator, VacuumState, VolumeOutcome};
pub use volume_client::{HttpVacuumClient, VacuumClient};
pub use volume_layout::VolumeLayout;
