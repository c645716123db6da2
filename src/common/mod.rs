//! Common utilities and types shared across minivac

pub mod config;
pub mod error;
pub mod metrics;
pub mod utils;

pub use config::{Config, CoordinatorConfig, VacuumConfig, VolumeSeed};
pub use error::{Error, Result, RpcError};
pub use metrics::METRICS;
pub use utils::{parse_duration, parse_threshold};
