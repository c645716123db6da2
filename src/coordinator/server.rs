//! Coordinator server

use crate::common::{Config, Result};
use crate::coordinator::http::{create_router, CoordState};
use crate::coordinator::replica_set::ReplicaSet;
use crate::coordinator::topology::Topology;
use crate::coordinator::vacuum::VacuumCoordinator;
use crate::coordinator::volume_client::HttpVacuumClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub struct Coordinator {
    config: Config,
}

impl Coordinator {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Build the shared state: seeded topology plus the vacuum coordinator
    pub fn build_state(&self) -> Result<CoordState> {
        let topology = Arc::new(Topology::new());
        for seed in &self.config.volumes {
            topology.register_volume(
                &seed.collection,
                seed.replication,
                seed.volume,
                ReplicaSet::new(seed.nodes.iter().cloned()),
                seed.writable,
            )?;
        }

        let client = HttpVacuumClient::new(
            self.config.coordinator.node_scheme.clone(),
            self.config.vacuum.rpc_timeout(),
        )?;
        let vacuum = Arc::new(VacuumCoordinator::new(
            Arc::new(client),
            self.config.vacuum.clone(),
        ));

        Ok(CoordState { topology, vacuum })
    }

    pub async fn serve(self) -> Result<()> {
        let vacuum = &self.config.vacuum;
        tracing::info!("Starting coordinator: {}", self.config.node_id);
        tracing::info!("  HTTP API: {}", self.config.coordinator.bind_addr);
        tracing::info!("  Garbage threshold: {}", vacuum.garbage_threshold);
        tracing::info!("  Phase timeout: {:?}", vacuum.phase_timeout());
        match vacuum.interval() {
            Some(interval) => tracing::info!("  Sweep interval: {:?}", interval),
            None => tracing::info!("  Periodic sweep disabled"),
        }

        let state = self.build_state()?;
        tracing::info!("  Seeded volumes: {}", state.topology.volume_count());

        let scheduler = vacuum
            .interval()
            .map(|interval| spawn_vacuum_loop(state.clone(), interval));

        let listener = tokio::net::TcpListener::bind(self.config.coordinator.bind_addr).await?;
        tracing::info!("✓ Coordinator ready");

        let result = axum::serve(listener, create_router(state))
            .with_graceful_shutdown(shutdown_signal())
            .await;

        if let Some(handle) = scheduler {
            handle.abort();
        }
        if let Err(e) = result {
            tracing::error!("HTTP server error: {}", e);
            return Err(e.into());
        }

        tracing::info!("Coordinator stopped");
        Ok(())
    }
}

/// Run a sweep every `interval`, starting one interval from now.
///
/// A sweep that overruns delays the next one instead of stacking up.
pub fn spawn_vacuum_loop(state: CoordState, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = state.vacuum.sweep(&state.topology).await;
            if !report.attention.is_empty() {
                tracing::warn!(
                    sweep_id = %report.sweep_id,
                    volumes = ?report.attention.iter().map(|a| a.volume).collect::<Vec<_>>(),
                    "Volumes need operator attention after vacuum"
                );
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
