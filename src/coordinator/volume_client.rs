//! Vacuum RPCs against a single storage node
//!
//! Each storage node exposes three admin verbs:
//! - `vacuum_volume_check`   (`volume`, `garbageThreshold`) → needs vacuum?
//! - `vacuum_volume_compact` (`volume`) → rewrite the volume without garbage
//! - `vacuum_volume_commit`  (`volume`) → swap the compacted file into place
//!
//! All three answer `{"Result": bool, "Error": string}`.

use crate::common::{Result, RpcError};
use crate::coordinator::types::{NodeEndpoint, VolumeId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const CHECK_PATH: &str = "/admin/vacuum_volume_check";
pub const COMPACT_PATH: &str = "/admin/vacuum_volume_compact";
pub const COMMIT_PATH: &str = "/admin/vacuum_volume_commit";

/// Wire shape of every vacuum reply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VacuumVolumeResult {
    #[serde(rename = "Result", default)]
    pub result: bool,
    #[serde(rename = "Error", default)]
    pub error: String,
}

impl VacuumVolumeResult {
    /// A non-empty `Error` wins over `Result`
    pub fn into_result(self, node: &NodeEndpoint, vid: VolumeId) -> std::result::Result<bool, RpcError> {
        if self.error.is_empty() {
            Ok(self.result)
        } else {
            Err(RpcError::Domain {
                node: node.clone(),
                vid,
                message: self.error,
            })
        }
    }
}

/// The three vacuum verbs, as seen by the coordinator
#[async_trait]
pub trait VacuumClient: Send + Sync + 'static {
    /// Does the node's copy of `vid` hold more garbage than `garbage_threshold`?
    async fn check(
        &self,
        node: &NodeEndpoint,
        vid: VolumeId,
        garbage_threshold: f64,
    ) -> std::result::Result<bool, RpcError>;

    /// Rewrite the node's copy of `vid` without garbage. Safe to retry.
    async fn compact(&self, node: &NodeEndpoint, vid: VolumeId) -> std::result::Result<(), RpcError>;

    /// Make the compacted copy the live one.
    async fn commit(&self, node: &NodeEndpoint, vid: VolumeId) -> std::result::Result<(), RpcError>;
}

/// HTTP implementation talking form-encoded POSTs to storage nodes
#[derive(Debug, Clone)]
pub struct HttpVacuumClient {
    http: reqwest::Client,
    scheme: String,
}

impl HttpVacuumClient {
    /// `rpc_timeout` bounds each request; `None` leaves only the phase deadline.
    pub fn new(scheme: impl Into<String>, rpc_timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = rpc_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            scheme: scheme.into(),
        })
    }

    pub fn url(&self, node: &NodeEndpoint, path: &str) -> String {
        let base = node.as_str().trim_end_matches('/');
        if base.contains("://") {
            format!("{}{}", base, path)
        } else {
            format!("{}://{}{}", self.scheme, base, path)
        }
    }

    async fn call(
        &self,
        node: &NodeEndpoint,
        vid: VolumeId,
        path: &str,
        params: &[(&str, String)],
    ) -> std::result::Result<bool, RpcError> {
        let url = self.url(node, path);
        let response = self
            .http
            .post(&url)
            .form(params)
            .send()
            .await
            .map_err(|e| request_error(node, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Transport {
                node: node.clone(),
                reason: format!("{} returned HTTP {}", path, status),
            });
        }

        let reply: VacuumVolumeResult = response.json().await.map_err(|e| {
            tracing::debug!(%node, %vid, ?params, "Unreadable vacuum reply");
            RpcError::Transport {
                node: node.clone(),
                reason: format!("malformed response from {}: {}", path, e),
            }
        })?;

        reply.into_result(node, vid)
    }
}

fn request_error(node: &NodeEndpoint, e: reqwest::Error) -> RpcError {
    if e.is_timeout() {
        RpcError::Timeout { node: node.clone() }
    } else {
        RpcError::Transport {
            node: node.clone(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl VacuumClient for HttpVacuumClient {
    async fn check(
        &self,
        node: &NodeEndpoint,
        vid: VolumeId,
        garbage_threshold: f64,
    ) -> std::result::Result<bool, RpcError> {
        let params = [
            ("volume", vid.to_string()),
            ("garbageThreshold", garbage_threshold.to_string()),
        ];
        self.call(node, vid, CHECK_PATH, &params).await
    }

    async fn compact(&self, node: &NodeEndpoint, vid: VolumeId) -> std::result::Result<(), RpcError> {
        self.call(node, vid, COMPACT_PATH, &[("volume", vid.to_string())])
            .await
            .map(|_| ())
    }

    async fn commit(&self, node: &NodeEndpoint, vid: VolumeId) -> std::result::Result<(), RpcError> {
        self.call(node, vid, COMMIT_PATH, &[("volume", vid.to_string())])
            .await
            .map(|_| ())
    }
}
