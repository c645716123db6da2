//! Error types for minivac

use crate::coordinator::types::{NodeEndpoint, VolumeId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Topology Errors ===
    #[error("Volume not found: {0}")]
    VolumeNotFound(VolumeId),

    #[error("Volume {0} has an empty replica set")]
    EmptyReplicaSet(VolumeId),

    #[error("Volume {vid} already registered in layout {existing}")]
    VolumeInOtherLayout { vid: VolumeId, existing: String },

    #[error("Invalid replication class: {0}")]
    InvalidReplication(String),

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::ConnectionFailed(_) | Error::Http(_)
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::VolumeNotFound(_) => StatusCode::NOT_FOUND,
            Error::EmptyReplicaSet(_)
            | Error::InvalidReplication(_)
            | Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Error::VolumeInOtherLayout { .. } => StatusCode::CONFLICT,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::ConnectionFailed(_) | Error::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else if e.is_connect() {
            Error::ConnectionFailed(e.to_string())
        } else {
            Error::Http(e.to_string())
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

/// Failure of a single vacuum RPC against one storage node.
///
/// Transport and timeout failures mean "could not confirm success" and are
/// picked up again by the next scheduled sweep. Domain failures are reported
/// by the node itself about a specific volume and usually point at a
/// node-local problem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("transport error talking to {node}: {reason}")]
    Transport { node: NodeEndpoint, reason: String },

    #[error("volume {vid} on {node} reported: {message}")]
    Domain {
        node: NodeEndpoint,
        vid: VolumeId,
        message: String,
    },

    #[error("timed out waiting for {node}")]
    Timeout { node: NodeEndpoint },
}

impl RpcError {
    pub fn node(&self) -> &NodeEndpoint {
        match self {
            RpcError::Transport { node, .. }
            | RpcError::Domain { node, .. }
            | RpcError::Timeout { node } => node,
        }
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::Transport { .. } => "transport",
            RpcError::Domain { .. } => "domain",
            RpcError::Timeout { .. } => "timeout",
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, RpcError::Domain { .. })
    }
}
