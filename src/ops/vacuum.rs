//! Cluster vacuum, triggered through the coordinator's admin API

use crate::common::{Error, Result};
use crate::coordinator::types::VolumeId;
use crate::coordinator::vacuum::{SweepReport, VolumeOutcome};
use serde::Deserialize;

fn endpoint(coordinator_url: &str, path: &str) -> String {
    format!("{}{}", coordinator_url.trim_end_matches('/'), path)
}

async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Http(format!("coordinator returned {}: {}", status, body)))
}

/// Ask the coordinator to sweep every volume now
pub async fn vacuum_cluster(coordinator_url: &str, garbage_threshold: Option<f64>) -> Result<SweepReport> {
    tracing::info!("Starting cluster vacuum");

    let mut request = reqwest::Client::new().post(endpoint(coordinator_url, "/vol/vacuum"));
    if let Some(threshold) = garbage_threshold {
        request = request.query(&[("garbageThreshold", threshold.to_string())]);
    }

    let response = expect_success(request.send().await?).await?;
    Ok(response.json().await?)
}

#[derive(Debug, Deserialize)]
struct SingleVacuumReply {
    result: VolumeOutcome,
}

/// Ask the coordinator to vacuum a single volume now
pub async fn vacuum_volume(
    coordinator_url: &str,
    vid: VolumeId,
    garbage_threshold: Option<f64>,
) -> Result<VolumeOutcome> {
    tracing::info!(%vid, "Starting volume vacuum");

    let mut query = vec![("volume", vid.to_string())];
    if let Some(threshold) = garbage_threshold {
        query.push(("garbageThreshold", threshold.to_string()));
    }

    let response = reqwest::Client::new()
        .post(endpoint(coordinator_url, "/vol/vacuum"))
        .query(&query)
        .send()
        .await?;
    let reply: SingleVacuumReply = expect_success(response).await?.json().await?;
    Ok(reply.result)
}

/// Fetch the coordinator's topology and vacuum state
pub async fn cluster_status(coordinator_url: &str) -> Result<serde_json::Value> {
    let response = reqwest::Client::new()
        .get(endpoint(coordinator_url, "/vol/status"))
        .send()
        .await?;
    Ok(expect_success(response).await?.json().await?)
}
