//! # minivac
//!
//! Garbage-collection coordinator for a cluster of replicated, append-only
//! blob volumes:
//! - Unanimous check across every replica before touching a volume
//! - Concurrent compaction and commit with per-phase deadlines
//! - Per-replica commit tracking, no all-or-nothing latch
//! - Bounded concurrent sweeps with a single pass per volume at a time
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │              Coordinator                  │
//! │  Topology: collection → layout → volume   │
//! │  VacuumCoordinator: check/compact/commit  │
//! └───────────┬───────────────────────────────┘
//!             │ HTTP (vacuum_volume_*)
//!   ┌─────────┴──────────┬──────────────┐
//!   │                    │              │
//! ┌─▼──────────┐   ┌─────▼──────┐   ┌──▼───────────┐
//! │ Node A     │   │ Node B     │   │ Node C       │
//! │ vol 1, 2   │   │ vol 1, 3   │   │ vol 2, 3     │
//! └────────────┘   └────────────┘   └──────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! minivac-coord serve \
//!   --bind 0.0.0.0:9333 \
//!   --garbage-threshold 0.3 \
//!   --interval 15m
//! ```
//!
//! ### Use the CLI
//! ```bash
//! # Sweep the whole cluster now
//! minivac vacuum --garbage-threshold 0.4
//!
//! # Vacuum a single volume
//! minivac vacuum --volume 7
//!
//! # Inspect layouts and vacuum state
//! minivac status
//! ```

pub mod common;
pub mod coordinator;
pub mod ops;

// Re-export commonly used types
pub use common::{Config, Error, Result, RpcError};
pub use coordinator::{Coordinator, Topology, VacuumCoordinator};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
