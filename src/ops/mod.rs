//! Ops commands for cluster management

pub mod vacuum;

pub use vacuum::{cluster_status, vacuum_cluster, vacuum_volume};
