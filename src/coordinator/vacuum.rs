//! Distributed vacuum protocol
//!
//! For each volume the coordinator drives three strictly ordered phases
//! against every replica:
//!
//! 1. **Check**: every replica must report garbage above the threshold.
//!    Any "no", error or timeout skips the volume.
//! 2. **Compact**: the volume leaves the writable set and its replicas are
//!    hidden from routing, then every replica rewrites its copy. Any failure
//!    stops the volume here; nothing is committed.
//! 3. **Commit**: every replica swaps the compacted copy in. Each replica
//!    that commits becomes available again on its own, regardless of what
//!    the others answered.
//!
//! Each phase fans out one task per replica and joins them against a
//! deadline. Answers arriving after the deadline are dropped.
//!
//! A pass whose future is dropped midway (caller cancelled, server shutting
//! down) still releases the volume: its replicas are made routable again,
//! the volume stays read-only and an `Interrupted` outcome is recorded.

use crate::common::{Error, Result, RpcError, VacuumConfig, METRICS};
use crate::coordinator::replica_set::ReplicaSet;
use crate::coordinator::topology::Topology;
use crate::coordinator::types::{NodeEndpoint, VolumeId};
use crate::coordinator::volume_client::VacuumClient;
use crate::coordinator::volume_layout::VolumeLayout;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Check,
    Compact,
    Commit,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Check => "check",
            Phase::Compact => "compact",
            Phase::Commit => "commit",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a volume stands within one vacuum pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VacuumState {
    Idle,
    Checking,
    Compacting,
    Committing,
    PartiallyCommitted,
    FullyCommitted,
}

/// A replica that failed a phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub node: NodeEndpoint,
    pub phase: Phase,
    pub kind: String,
    pub error: String,
}

impl NodeFailure {
    fn new(phase: Phase, err: &RpcError) -> Self {
        Self {
            node: err.node().clone(),
            phase,
            kind: err.kind().to_string(),
            error: err.to_string(),
        }
    }
}

/// Terminal result of one volume's pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VolumeOutcome {
    /// Another pass for this volume was already running
    Busy,
    /// Every replica answered and at least one has too little garbage
    NotNeeded,
    /// Some replica could not answer the check
    CheckFailed { failures: Vec<NodeFailure> },
    /// Some replica failed to compact; nothing was committed
    CompactFailed { failures: Vec<NodeFailure> },
    /// Some replicas committed, others did not
    PartiallyCommitted {
        committed: Vec<NodeEndpoint>,
        failures: Vec<NodeFailure>,
    },
    FullyCommitted { committed: Vec<NodeEndpoint> },
    /// The pass was cancelled during `phase` before reaching an outcome
    Interrupted { phase: Phase },
}

impl VolumeOutcome {
    pub fn state(&self) -> VacuumState {
        match self {
            VolumeOutcome::PartiallyCommitted { .. } => VacuumState::PartiallyCommitted,
            VolumeOutcome::FullyCommitted { .. } => VacuumState::FullyCommitted,
            _ => VacuumState::Idle,
        }
    }

    /// Left in a state an operator should look at
    pub fn needs_attention(&self) -> bool {
        match self {
            VolumeOutcome::CompactFailed { .. } | VolumeOutcome::PartiallyCommitted { .. } => true,
            VolumeOutcome::Interrupted { phase } => *phase != Phase::Check,
            _ => false,
        }
    }

    pub fn failures(&self) -> &[NodeFailure] {
        match self {
            VolumeOutcome::CheckFailed { failures }
            | VolumeOutcome::CompactFailed { failures }
            | VolumeOutcome::PartiallyCommitted { failures, .. } => failures,
            _ => &[],
        }
    }
}

/// Per-replica results of one phase, in replica order
#[derive(Debug)]
pub struct PhaseOutcome<T> {
    pub results: Vec<(NodeEndpoint, std::result::Result<T, RpcError>)>,
    pub timed_out: bool,
}

impl<T> PhaseOutcome<T> {
    /// No deadline hit and no replica failed
    pub fn all_ok(&self) -> bool {
        !self.timed_out && self.results.iter().all(|(_, r)| r.is_ok())
    }

    pub fn errors(&self) -> impl Iterator<Item = &RpcError> {
        self.results.iter().filter_map(|(_, r)| r.as_ref().err())
    }

    fn failures(&self, phase: Phase) -> Vec<NodeFailure> {
        self.errors().map(|e| NodeFailure::new(phase, e)).collect()
    }
}

/// Last terminal outcome seen for a volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub outcome: VolumeOutcome,
    pub finished_at: DateTime<Utc>,
}

/// A volume left degraded by a sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionItem {
    pub volume: VolumeId,
    pub state: String,
    pub failures: Vec<NodeFailure>,
}

/// Aggregate result of a cluster sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub sweep_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub garbage_threshold: f64,
    pub volumes_total: usize,
    pub checked: usize,
    pub compacted: usize,
    pub fully_committed: usize,
    pub partially_committed: usize,
    pub compact_failed: usize,
    pub skipped: usize,
    pub busy: usize,
    pub interrupted: usize,
    pub attention: Vec<AttentionItem>,
}

impl SweepReport {
    fn new(sweep_id: Uuid, started_at: DateTime<Utc>, garbage_threshold: f64) -> Self {
        Self {
            sweep_id,
            started_at,
            finished_at: started_at,
            garbage_threshold,
            volumes_total: 0,
            checked: 0,
            compacted: 0,
            fully_committed: 0,
            partially_committed: 0,
            compact_failed: 0,
            skipped: 0,
            busy: 0,
            interrupted: 0,
            attention: Vec::new(),
        }
    }

    fn record(&mut self, vid: VolumeId, outcome: &VolumeOutcome) {
        self.volumes_total += 1;
        if !matches!(outcome, VolumeOutcome::Busy) {
            self.checked += 1;
        }
        match outcome {
            VolumeOutcome::Busy => self.busy += 1,
            VolumeOutcome::NotNeeded | VolumeOutcome::CheckFailed { .. } => self.skipped += 1,
            VolumeOutcome::CompactFailed { .. } => self.compact_failed += 1,
            VolumeOutcome::PartiallyCommitted { .. } => {
                self.compacted += 1;
                self.partially_committed += 1;
            }
            VolumeOutcome::FullyCommitted { .. } => {
                self.compacted += 1;
                self.fully_committed += 1;
            }
            VolumeOutcome::Interrupted { .. } => self.interrupted += 1,
        }
        if outcome.needs_attention() {
            let state = match outcome {
                VolumeOutcome::CompactFailed { .. } => "compact_failed",
                VolumeOutcome::Interrupted { .. } => "interrupted",
                _ => "partially_committed",
            };
            self.attention.push(AttentionItem {
                volume: vid,
                state: state.to_string(),
                failures: outcome.failures().to_vec(),
            });
        }
    }
}

type FlightMap = Mutex<HashMap<VolumeId, VacuumState>>;

/// Single-flight registration of a volume; removed on drop.
///
/// Dropped without `finish`, the pass was cancelled: replicas hidden by the
/// compact phase are made available again before the volume is released.
struct Flight<'a> {
    vid: VolumeId,
    owner: &'a VacuumCoordinator,
    layout: &'a VolumeLayout,
    replicas: &'a ReplicaSet,
    finished: bool,
}

impl Flight<'_> {
    fn set(&self, state: VacuumState) {
        self.owner.in_flight.lock().insert(self.vid, state);
        tracing::debug!(vid = %self.vid, ?state, "Vacuum state change");
    }

    fn finish(mut self) {
        self.finished = true;
    }

    fn interrupted_phase(&self) -> Phase {
        match self.owner.in_flight.lock().get(&self.vid) {
            Some(VacuumState::Compacting) => Phase::Compact,
            Some(
                VacuumState::Committing
                | VacuumState::PartiallyCommitted
                | VacuumState::FullyCommitted,
            ) => Phase::Commit,
            _ => Phase::Check,
        }
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let phase = self.interrupted_phase();
            if phase != Phase::Check {
                // Live data only changes on commit, which is an atomic swap.
                for node in self.replicas {
                    self.layout.set_volume_available(self.vid, node);
                }
            }
            tracing::warn!(vid = %self.vid, %phase, "Vacuum pass cancelled before an outcome");
            self.owner
                .record_outcome(self.vid, VolumeOutcome::Interrupted { phase });
        }
        self.owner.in_flight.lock().remove(&self.vid);
        METRICS.volumes_in_flight.dec();
    }
}

pub struct VacuumCoordinator {
    client: Arc<dyn VacuumClient>,
    config: VacuumConfig,
    in_flight: FlightMap,
    last_outcomes: Mutex<BTreeMap<VolumeId, VolumeRecord>>,
}

impl VacuumCoordinator {
    pub fn new(client: Arc<dyn VacuumClient>, config: VacuumConfig) -> Self {
        Self {
            client,
            config,
            in_flight: Mutex::new(HashMap::new()),
            last_outcomes: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &VacuumConfig {
        &self.config
    }

    /// Volumes with a pass in progress and their current phase
    pub fn in_flight(&self) -> BTreeMap<VolumeId, VacuumState> {
        self.in_flight
            .lock()
            .iter()
            .map(|(vid, state)| (*vid, *state))
            .collect()
    }

    pub fn state(&self, vid: VolumeId) -> VacuumState {
        self.in_flight
            .lock()
            .get(&vid)
            .copied()
            .unwrap_or(VacuumState::Idle)
    }

    pub fn last_outcome(&self, vid: VolumeId) -> Option<VolumeRecord> {
        self.last_outcomes.lock().get(&vid).cloned()
    }

    pub fn last_outcomes(&self) -> BTreeMap<VolumeId, VolumeRecord> {
        self.last_outcomes.lock().clone()
    }

    fn begin<'a>(
        &'a self,
        layout: &'a VolumeLayout,
        vid: VolumeId,
        replicas: &'a ReplicaSet,
    ) -> Option<Flight<'a>> {
        let mut in_flight = self.in_flight.lock();
        if in_flight.contains_key(&vid) {
            return None;
        }
        in_flight.insert(vid, VacuumState::Idle);
        METRICS.volumes_in_flight.inc();
        Some(Flight {
            vid,
            owner: self,
            layout,
            replicas,
            finished: false,
        })
    }

    fn record_outcome(&self, vid: VolumeId, outcome: VolumeOutcome) {
        match &outcome {
            VolumeOutcome::Busy => {}
            VolumeOutcome::NotNeeded | VolumeOutcome::CheckFailed { .. } => {
                METRICS.volumes_skipped.inc()
            }
            VolumeOutcome::CompactFailed { .. } => METRICS.volumes_compact_failed.inc(),
            VolumeOutcome::PartiallyCommitted { .. } => {
                METRICS.volumes_partially_committed.inc()
            }
            VolumeOutcome::FullyCommitted { .. } => METRICS.volumes_fully_committed.inc(),
            VolumeOutcome::Interrupted { .. } => METRICS.volumes_interrupted.inc(),
        }
        self.last_outcomes.lock().insert(
            vid,
            VolumeRecord {
                outcome,
                finished_at: Utc::now(),
            },
        );
    }

    /// Run the whole-cluster sweep with the configured threshold
    pub async fn sweep(&self, topology: &Topology) -> SweepReport {
        self.sweep_with_threshold(topology, self.config.garbage_threshold)
            .await
    }

    /// Walk every collection, layout and volume and vacuum each volume.
    ///
    /// Volumes run independently, up to the configured concurrency cap. One
    /// volume's failure never aborts the sweep.
    pub async fn sweep_with_threshold(&self, topology: &Topology, garbage_threshold: f64) -> SweepReport {
        let sweep_id = Uuid::new_v4();
        let started = Instant::now();
        let mut report = SweepReport::new(sweep_id, Utc::now(), garbage_threshold);

        let tasks = topology.snapshot();
        let limit = self
            .config
            .concurrency_limit()
            .unwrap_or(tasks.len())
            .max(1);

        let span = tracing::info_span!("vacuum_sweep", %sweep_id);
        async {
            tracing::info!(volumes = tasks.len(), garbage_threshold, limit, "Starting vacuum sweep");

            let outcomes: Vec<(VolumeId, VolumeOutcome)> = stream::iter(tasks)
                .map(|task| async move {
                    let outcome = self
                        .vacuum_volume(&task.layout, task.vid, &task.replicas, garbage_threshold)
                        .await;
                    (task.vid, outcome)
                })
                .buffer_unordered(limit)
                .collect()
                .await;

            for (vid, outcome) in &outcomes {
                report.record(*vid, outcome);
            }
            report.attention.sort_by_key(|item| item.volume);

            tracing::info!(
                checked = report.checked,
                compacted = report.compacted,
                fully_committed = report.fully_committed,
                partially_committed = report.partially_committed,
                compact_failed = report.compact_failed,
                skipped = report.skipped,
                busy = report.busy,
                interrupted = report.interrupted,
                "Vacuum sweep finished in {:?}",
                started.elapsed()
            );
        }
        .instrument(span)
        .await;

        report.finished_at = Utc::now();
        METRICS.sweeps_total.inc();
        METRICS.sweep_duration.observe(started.elapsed().as_secs_f64());
        report
    }

    /// Vacuum one volume found through the topology
    pub async fn vacuum_volume_by_id(
        &self,
        topology: &Topology,
        vid: VolumeId,
        garbage_threshold: f64,
    ) -> Result<VolumeOutcome> {
        let layout = topology.lookup(vid).ok_or(Error::VolumeNotFound(vid))?;
        let replicas = layout.replicas(vid).ok_or(Error::VolumeNotFound(vid))?;
        Ok(self
            .vacuum_volume(&layout, vid, &replicas, garbage_threshold)
            .await)
    }

    /// Run the three-phase protocol for one volume
    pub async fn vacuum_volume(
        &self,
        layout: &VolumeLayout,
        vid: VolumeId,
        replicas: &ReplicaSet,
        garbage_threshold: f64,
    ) -> VolumeOutcome {
        let Some(flight) = self.begin(layout, vid, replicas) else {
            tracing::info!(%vid, "Vacuum already running for volume, skipping");
            METRICS.volumes_busy.inc();
            return VolumeOutcome::Busy;
        };

        let outcome = self
            .run_phases(&flight, layout, vid, replicas, garbage_threshold)
            .await;
        flight.finish();

        self.record_outcome(vid, outcome.clone());
        outcome
    }

    async fn run_phases(
        &self,
        flight: &Flight<'_>,
        layout: &VolumeLayout,
        vid: VolumeId,
        replicas: &ReplicaSet,
        garbage_threshold: f64,
    ) -> VolumeOutcome {
        // Phase 1: unanimous check
        flight.set(VacuumState::Checking);
        METRICS.volumes_checked.inc();
        let check = self
            .fan_out(Phase::Check, vid, replicas, move |client, node| async move {
                client.check(&node, vid, garbage_threshold).await
            })
            .await;

        if !check.all_ok() {
            return VolumeOutcome::CheckFailed {
                failures: check.failures(Phase::Check),
            };
        }
        if !check.results.iter().all(|(_, r)| matches!(r, Ok(true))) {
            tracing::debug!(%vid, "Not every replica needs vacuum");
            return VolumeOutcome::NotNeeded;
        }

        // Phase 2: compact everywhere
        flight.set(VacuumState::Compacting);
        layout.remove_from_writable(vid);
        for node in replicas {
            layout.set_volume_unavailable(vid, node);
        }
        tracing::info!(%vid, replicas = replicas.len(), "Compacting volume");

        let compact = self
            .fan_out(Phase::Compact, vid, replicas, move |client, node| async move {
                client.compact(&node, vid).await
            })
            .await;

        if !compact.all_ok() {
            // Live data is untouched until commit, so reads may resume even
            // while a timed-out compaction still runs on its node.
            for node in replicas {
                layout.set_volume_available(vid, node);
            }
            tracing::warn!(%vid, "Compaction failed, volume stays read-only and uncommitted");
            return VolumeOutcome::CompactFailed {
                failures: compact.failures(Phase::Compact),
            };
        }
        METRICS.volumes_compacted.inc();

        // Phase 3: commit, each replica on its own
        flight.set(VacuumState::Committing);
        let commit = self
            .fan_out(Phase::Commit, vid, replicas, move |client, node| async move {
                client.commit(&node, vid).await
            })
            .await;

        let mut committed = Vec::new();
        let mut failures = Vec::new();
        for (node, result) in &commit.results {
            match result {
                Ok(()) => {
                    layout.set_volume_available(vid, node);
                    committed.push(node.clone());
                }
                Err(e) => failures.push(NodeFailure::new(Phase::Commit, e)),
            }
        }

        if failures.is_empty() {
            flight.set(VacuumState::FullyCommitted);
            tracing::info!(%vid, "Vacuum committed on all replicas");
            VolumeOutcome::FullyCommitted { committed }
        } else {
            flight.set(VacuumState::PartiallyCommitted);
            tracing::warn!(
                %vid,
                committed = committed.len(),
                failed = failures.len(),
                "Vacuum committed on some replicas only"
            );
            VolumeOutcome::PartiallyCommitted {
                committed,
                failures,
            }
        }
    }

    /// Call every replica concurrently and wait for all of them or the deadline
    async fn fan_out<T, F, Fut>(
        &self,
        phase: Phase,
        vid: VolumeId,
        replicas: &ReplicaSet,
        call: F,
    ) -> PhaseOutcome<T>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn VacuumClient>, NodeEndpoint) -> Fut,
        Fut: Future<Output = std::result::Result<T, RpcError>> + Send + 'static,
    {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.phase_timeout();

        let mut tasks = JoinSet::new();
        for (idx, node) in replicas.iter().enumerate() {
            let fut = call(self.client.clone(), node.clone());
            tasks.spawn(async move { (idx, fut.await) });
        }

        let mut slots: Vec<Option<std::result::Result<T, RpcError>>> =
            replicas.iter().map(|_| None).collect();
        let mut timed_out = false;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((idx, result)))) => slots[idx] = Some(result),
                Ok(Some(Err(e))) => {
                    tracing::error!(%vid, phase = phase.as_str(), "Replica task died: {}", e)
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }
        // Stragglers may finish remotely; their answers go nowhere.
        tasks.detach_all();

        let results: Vec<_> = replicas
            .iter()
            .zip(slots)
            .map(|(node, slot)| {
                let result = slot.unwrap_or_else(|| {
                    Err(if timed_out {
                        RpcError::Timeout { node: node.clone() }
                    } else {
                        RpcError::Transport {
                            node: node.clone(),
                            reason: "replica task aborted".to_string(),
                        }
                    })
                });
                (node.clone(), result)
            })
            .collect();

        for err in results.iter().filter_map(|(_, r)| r.as_ref().err()) {
            METRICS.record_rpc_failure(phase.as_str(), err.kind());
            tracing::warn!(
                %vid,
                node = %err.node(),
                phase = phase.as_str(),
                kind = err.kind(),
                "Vacuum RPC failed: {}",
                err
            );
        }
        METRICS.record_phase(phase.as_str(), started.elapsed());

        PhaseOutcome { results, timed_out }
    }
}
