//! Configuration for minivac components
//!
//! Sources, lowest priority first:
//! 1. built-in defaults
//! 2. TOML file (`MINIVAC_CONFIG`, default `minivac.toml`, optional)
//! 3. environment, e.g. `MINIVAC__VACUUM__GARBAGE_THRESHOLD=0.4`
//!
//! Binaries apply CLI flags on top.

use crate::common::{Error, Result};
use crate::coordinator::types::{NodeEndpoint, ReplicationClass, VolumeId};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "MINIVAC_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "minivac.toml";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Node ID (unique identifier)
    pub node_id: String,

    /// Coordinator-specific config
    pub coordinator: CoordinatorConfig,

    /// Vacuum protocol tuning
    pub vacuum: VacuumConfig,

    /// Volumes known at start-up
    pub volumes: Vec<VolumeSeed>,

    /// Logging level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: "minivac-coord".to_string(),
            coordinator: CoordinatorConfig::default(),
            vacuum: VacuumConfig::default(),
            volumes: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Bind address for the admin HTTP API
    pub bind_addr: SocketAddr,

    /// Scheme used to reach storage nodes
    pub node_scheme: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9333)),
            node_scheme: "http".to_string(),
        }
    }
}

/// Vacuum configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VacuumConfig {
    /// Garbage ratio above which a replica asks to be vacuumed
    pub garbage_threshold: f64,

    /// Deadline for each protocol phase of one volume
    pub phase_timeout_ms: u64,

    /// Period of the background sweep (0 disables it)
    pub interval_secs: u64,

    /// Volumes vacuumed at once during a sweep (0 = no cap)
    pub max_concurrent_volumes: usize,

    /// Per-request HTTP timeout (0 = rely on the phase deadline only)
    pub rpc_timeout_ms: u64,
}

impl Default for VacuumConfig {
    fn default() -> Self {
        Self {
            garbage_threshold: 0.3,
            phase_timeout_ms: 30 * 60 * 1000,
            interval_secs: 15 * 60,
            max_concurrent_volumes: 0,
            rpc_timeout_ms: 0,
        }
    }
}

impl VacuumConfig {
    pub fn phase_timeout(&self) -> Duration {
        Duration::from_millis(self.phase_timeout_ms)
    }

    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }

    pub fn rpc_timeout(&self) -> Option<Duration> {
        (self.rpc_timeout_ms > 0).then(|| Duration::from_millis(self.rpc_timeout_ms))
    }

    pub fn concurrency_limit(&self) -> Option<usize> {
        (self.max_concurrent_volumes > 0).then_some(self.max_concurrent_volumes)
    }

    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.garbage_threshold)?;
        if self.phase_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "vacuum.phase_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Garbage thresholds are ratios of volume bytes
pub fn validate_threshold(threshold: f64) -> Result<()> {
    if threshold.is_finite() && (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "garbage threshold must be within [0, 1], got {}",
            threshold
        )))
    }
}

/// A volume location known before the membership feed reports it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolumeSeed {
    #[serde(default)]
    pub collection: String,
    #[serde(default)]
    pub replication: ReplicationClass,
    pub volume: VolumeId,
    pub nodes: Vec<NodeEndpoint>,
    #[serde(default = "default_writable")]
    pub writable: bool,
}

fn default_writable() -> bool {
    true
}

impl Config {
    /// Load from the file named by `MINIVAC_CONFIG` (or `minivac.toml`)
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("MINIVAC")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.vacuum.validate()?;
        for seed in &self.volumes {
            if seed.nodes.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "volume {} has no nodes",
                    seed.volume
                )));
            }
        }
        Ok(())
    }
}
