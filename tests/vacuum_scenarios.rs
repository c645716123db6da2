//! Vacuum protocol scenarios against scripted storage nodes

use async_trait::async_trait;
use minivac::common::{RpcError, VacuumConfig};
use minivac::coordinator::vacuum::{Phase, VolumeOutcome};
use minivac::coordinator::{
    NodeEndpoint, ReplicaSet, Topology, VacuumClient, VacuumCoordinator, VolumeId, VolumeLayout,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Verb {
    Check,
    Compact,
    Commit,
}

#[derive(Debug, Clone, Copy)]
enum Reply {
    /// Check says "needs vacuum", compact/commit succeed
    Yes,
    /// Check says "no garbage"
    No,
    Domain(&'static str),
    Transport,
    /// Answer only after the given delay
    After(Duration, bool),
}

/// Storage nodes whose answers are scripted per (verb, node)
#[derive(Default)]
struct ScriptedNodes {
    default_check: bool,
    script: HashMap<(Verb, String), Reply>,
    calls: Mutex<Vec<(Verb, String, VolumeId)>>,
    thresholds: Mutex<Vec<f64>>,
    call_delay: Option<Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedNodes {
    fn dirty() -> Self {
        Self {
            default_check: true,
            ..Default::default()
        }
    }

    fn clean() -> Self {
        Self::default()
    }

    fn on(mut self, verb: Verb, node: &str, reply: Reply) -> Self {
        self.script.insert((verb, node.to_string()), reply);
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.call_delay = Some(delay);
        self
    }

    fn count(&self, verb: Verb) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(v, _, _)| *v == verb)
            .count()
    }

    async fn answer(&self, verb: Verb, node: &NodeEndpoint, vid: VolumeId) -> Result<bool, RpcError> {
        self.calls
            .lock()
            .unwrap()
            .push((verb, node.to_string(), vid));

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.call_delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let default = if verb == Verb::Check && !self.default_check {
            Reply::No
        } else {
            Reply::Yes
        };
        let reply = self
            .script
            .get(&(verb, node.to_string()))
            .copied()
            .unwrap_or(default);

        match reply {
            Reply::Yes => Ok(true),
            Reply::No => Ok(false),
            Reply::Domain(message) => Err(RpcError::Domain {
                node: node.clone(),
                vid,
                message: message.to_string(),
            }),
            Reply::Transport => Err(RpcError::Transport {
                node: node.clone(),
                reason: "connection refused".to_string(),
            }),
            Reply::After(delay, answer) => {
                tokio::time::sleep(delay).await;
                Ok(answer)
            }
        }
    }
}

#[async_trait]
impl VacuumClient for ScriptedNodes {
    async fn check(&self, node: &NodeEndpoint, vid: VolumeId, garbage_threshold: f64) -> Result<bool, RpcError> {
        self.thresholds.lock().unwrap().push(garbage_threshold);
        self.answer(Verb::Check, node, vid).await
    }

    async fn compact(&self, node: &NodeEndpoint, vid: VolumeId) -> Result<(), RpcError> {
        self.answer(Verb::Compact, node, vid).await.map(|_| ())
    }

    async fn commit(&self, node: &NodeEndpoint, vid: VolumeId) -> Result<(), RpcError> {
        self.answer(Verb::Commit, node, vid).await.map(|_| ())
    }
}

const NODES: [&str; 3] = ["n1:8080", "n2:8080", "n3:8080"];

fn config(phase_timeout_ms: u64) -> VacuumConfig {
    VacuumConfig {
        garbage_threshold: 0.3,
        phase_timeout_ms,
        ..Default::default()
    }
}

struct Harness {
    nodes: Arc<ScriptedNodes>,
    coordinator: VacuumCoordinator,
    topology: Topology,
    layout: Arc<VolumeLayout>,
    replicas: ReplicaSet,
}

impl Harness {
    fn new(nodes: ScriptedNodes, phase_timeout_ms: u64) -> Self {
        let nodes = Arc::new(nodes);
        let topology = Topology::new();
        let replicas = ReplicaSet::new(NODES);
        let layout = topology
            .register_volume("pics", "002".parse().unwrap(), VolumeId(1), replicas.clone(), true)
            .unwrap();
        Self {
            coordinator: VacuumCoordinator::new(nodes.clone(), config(phase_timeout_ms)),
            nodes,
            topology,
            layout,
            replicas,
        }
    }

    async fn vacuum(&self) -> VolumeOutcome {
        self.coordinator
            .vacuum_volume(&self.layout, VolumeId(1), &self.replicas, 0.3)
            .await
    }

    fn available(&self) -> Vec<String> {
        self.layout
            .available_nodes(VolumeId(1))
            .iter()
            .map(|n| n.to_string())
            .collect()
    }
}

#[tokio::test]
async fn test_all_replicas_dirty_commits_everywhere() {
    let h = Harness::new(ScriptedNodes::dirty(), 5_000);

    let outcome = h.vacuum().await;

    match &outcome {
        VolumeOutcome::FullyCommitted { committed } => assert_eq!(committed.len(), 3),
        other => panic!("expected full commit, got {:?}", other),
    }
    assert_eq!(h.nodes.count(Verb::Check), 3);
    assert_eq!(h.nodes.count(Verb::Compact), 3);
    assert_eq!(h.nodes.count(Verb::Commit), 3);
    assert!(h.nodes.thresholds.lock().unwrap().iter().all(|t| *t == 0.3));

    assert!(!h.layout.is_writable(VolumeId(1)));
    assert_eq!(h.available(), NODES.to_vec());
    assert!(!outcome.needs_attention());
    assert!(h.coordinator.last_outcome(VolumeId(1)).is_some());
}

#[tokio::test]
async fn test_one_clean_replica_skips_volume() {
    let h = Harness::new(ScriptedNodes::dirty().on(Verb::Check, "n2:8080", Reply::No), 5_000);

    let outcome = h.vacuum().await;

    assert_eq!(outcome, VolumeOutcome::NotNeeded);
    assert_eq!(h.nodes.count(Verb::Check), 3);
    assert_eq!(h.nodes.count(Verb::Compact), 0);
    assert_eq!(h.nodes.count(Verb::Commit), 0);
    assert!(h.layout.is_writable(VolumeId(1)));
    assert_eq!(h.available(), NODES.to_vec());
}

#[tokio::test]
async fn test_check_errors_count_as_no() {
    for reply in [Reply::Transport, Reply::Domain("volume not loaded")] {
        let h = Harness::new(ScriptedNodes::dirty().on(Verb::Check, "n3:8080", reply), 5_000);

        let outcome = h.vacuum().await;

        match &outcome {
            VolumeOutcome::CheckFailed { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].node.as_str(), "n3:8080");
                assert_eq!(failures[0].phase, Phase::Check);
            }
            other => panic!("expected check failure, got {:?}", other),
        }
        assert_eq!(h.nodes.count(Verb::Compact), 0);
        assert!(h.layout.is_writable(VolumeId(1)));
    }
}

#[tokio::test]
async fn test_compact_failure_blocks_commit() {
    let h = Harness::new(
        ScriptedNodes::dirty().on(Verb::Compact, "n2:8080", Reply::Domain("disk full")),
        5_000,
    );

    let outcome = h.vacuum().await;

    match &outcome {
        VolumeOutcome::CompactFailed { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].node.as_str(), "n2:8080");
            assert_eq!(failures[0].kind, "domain");
            assert!(failures[0].error.contains("disk full"));
        }
        other => panic!("expected compact failure, got {:?}", other),
    }
    assert!(outcome.needs_attention());
    assert_eq!(h.nodes.count(Verb::Compact), 3);
    assert_eq!(h.nodes.count(Verb::Commit), 0);
    // Stays off the writable set until an operator steps in
    assert!(!h.layout.is_writable(VolumeId(1)));
    assert_eq!(h.available(), NODES.to_vec());
}

#[tokio::test]
async fn test_compact_timeout_restores_reads_but_not_writes() {
    let h = Harness::new(
        ScriptedNodes::dirty().on(
            Verb::Compact,
            "n2:8080",
            Reply::After(Duration::from_secs(30), true),
        ),
        200,
    );

    let outcome = h.vacuum().await;

    match &outcome {
        VolumeOutcome::CompactFailed { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].node.as_str(), "n2:8080");
            assert_eq!(failures[0].kind, "timeout");
        }
        other => panic!("expected compact failure, got {:?}", other),
    }
    assert_eq!(h.nodes.count(Verb::Commit), 0);
    assert!(!h.layout.is_writable(VolumeId(1)));
    assert_eq!(h.available(), NODES.to_vec());
}

/// Compactions block until the test lets them go
struct GatedCompaction {
    arrived: Semaphore,
    release: Semaphore,
}

#[async_trait]
impl VacuumClient for GatedCompaction {
    async fn check(&self, _: &NodeEndpoint, _: VolumeId, _: f64) -> Result<bool, RpcError> {
        Ok(true)
    }

    async fn compact(&self, _: &NodeEndpoint, _: VolumeId) -> Result<(), RpcError> {
        self.arrived.add_permits(1);
        self.release.acquire().await.unwrap().forget();
        Ok(())
    }

    async fn commit(&self, _: &NodeEndpoint, _: VolumeId) -> Result<(), RpcError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_replicas_hidden_while_compacting() {
    let gate = Arc::new(GatedCompaction {
        arrived: Semaphore::new(0),
        release: Semaphore::new(0),
    });
    let topology = Topology::new();
    let replicas = ReplicaSet::new(NODES);
    let layout = topology
        .register_volume("pics", "002".parse().unwrap(), VolumeId(1), replicas.clone(), true)
        .unwrap();
    let coordinator = VacuumCoordinator::new(gate.clone(), config(5_000));

    let observe = async {
        gate.arrived.acquire_many(3).await.unwrap().forget();
        let seen = (
            layout.available_nodes(VolumeId(1)),
            layout.is_writable(VolumeId(1)),
            coordinator.state(VolumeId(1)),
        );
        gate.release.add_permits(3);
        seen
    };
    let (outcome, (available, writable, state)) = tokio::join!(
        coordinator.vacuum_volume(&layout, VolumeId(1), &replicas, 0.3),
        observe
    );

    assert!(available.is_empty());
    assert!(!writable);
    assert_eq!(state, minivac::coordinator::VacuumState::Compacting);

    assert!(matches!(outcome, VolumeOutcome::FullyCommitted { .. }));
    assert_eq!(layout.available_nodes(VolumeId(1)).len(), 3);
}

#[tokio::test]
async fn test_cancelled_sweep_releases_volume() {
    let mut nodes = ScriptedNodes::dirty();
    for node in NODES {
        nodes = nodes.on(Verb::Compact, node, Reply::After(Duration::from_millis(500), true));
    }
    let h = Harness::new(nodes, 5_000);

    // Dropped while every replica is compacting
    let cancelled = tokio::time::timeout(
        Duration::from_millis(100),
        h.coordinator.sweep(&h.topology),
    )
    .await;
    assert!(cancelled.is_err());

    assert_eq!(h.available(), NODES.to_vec());
    assert!(!h.layout.is_writable(VolumeId(1)));
    assert!(h.coordinator.in_flight().is_empty());
    let record = h.coordinator.last_outcome(VolumeId(1)).unwrap();
    assert_eq!(record.outcome, VolumeOutcome::Interrupted { phase: Phase::Compact });
    assert!(record.outcome.needs_attention());
    assert_eq!(h.nodes.count(Verb::Commit), 0);

    // Nothing is left locked; the next pass goes through
    let outcome = h.vacuum().await;
    assert!(matches!(outcome, VolumeOutcome::FullyCommitted { .. }));
}

#[tokio::test]
async fn test_cancelled_check_leaves_layout_untouched() {
    let h = Harness::new(
        ScriptedNodes::dirty().on(
            Verb::Check,
            "n1:8080",
            Reply::After(Duration::from_secs(30), true),
        ),
        5_000,
    );

    let cancelled = tokio::time::timeout(Duration::from_millis(100), h.vacuum()).await;
    assert!(cancelled.is_err());

    assert!(h.layout.is_writable(VolumeId(1)));
    assert_eq!(h.available(), NODES.to_vec());
    let record = h.coordinator.last_outcome(VolumeId(1)).unwrap();
    assert_eq!(record.outcome, VolumeOutcome::Interrupted { phase: Phase::Check });
    assert!(!record.outcome.needs_attention());
}

#[tokio::test]
async fn test_commit_timeout_leaves_only_that_replica_unavailable() {
    let h = Harness::new(
        ScriptedNodes::dirty().on(
            Verb::Commit,
            "n3:8080",
            Reply::After(Duration::from_secs(30), true),
        ),
        200,
    );

    let outcome = h.vacuum().await;

    match &outcome {
        VolumeOutcome::PartiallyCommitted { committed, failures } => {
            let committed: Vec<&str> = committed.iter().map(|n| n.as_str()).collect();
            assert_eq!(committed, vec!["n1:8080", "n2:8080"]);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].node.as_str(), "n3:8080");
            assert_eq!(failures[0].kind, "timeout");
        }
        other => panic!("expected partial commit, got {:?}", other),
    }
    assert_ne!(
        outcome.state(),
        minivac::coordinator::VacuumState::FullyCommitted
    );
    assert_eq!(h.available(), vec!["n1:8080", "n2:8080"]);
    assert!(!h.layout.is_available(VolumeId(1), &NodeEndpoint::new("n3:8080")));
}

#[tokio::test]
async fn test_first_commit_failure_does_not_latch_later_replicas() {
    let h = Harness::new(
        ScriptedNodes::dirty().on(Verb::Commit, "n1:8080", Reply::Transport),
        5_000,
    );

    let outcome = h.vacuum().await;

    assert!(matches!(outcome, VolumeOutcome::PartiallyCommitted { .. }));
    assert_eq!(h.available(), vec!["n2:8080", "n3:8080"]);
}

#[tokio::test]
async fn test_check_deadline_fails_phase_despite_other_answers() {
    let h = Harness::new(
        ScriptedNodes::dirty().on(
            Verb::Check,
            "n1:8080",
            Reply::After(Duration::from_secs(30), true),
        ),
        150,
    );

    let outcome = h.vacuum().await;

    match &outcome {
        VolumeOutcome::CheckFailed { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].kind, "timeout");
        }
        other => panic!("expected check failure, got {:?}", other),
    }
    assert_eq!(h.nodes.count(Verb::Compact), 0);
    assert!(h.layout.is_writable(VolumeId(1)));
}

#[tokio::test]
async fn test_late_commit_answer_is_ignored() {
    let h = Harness::new(
        ScriptedNodes::dirty().on(
            Verb::Commit,
            "n2:8080",
            Reply::After(Duration::from_millis(300), true),
        ),
        100,
    );

    let outcome = h.vacuum().await;
    assert!(matches!(outcome, VolumeOutcome::PartiallyCommitted { .. }));

    // Give the straggler time to answer
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.available(), vec!["n1:8080", "n3:8080"]);
    assert!(matches!(
        h.coordinator.last_outcome(VolumeId(1)).unwrap().outcome,
        VolumeOutcome::PartiallyCommitted { .. }
    ));
}

#[tokio::test]
async fn test_concurrent_pass_on_same_volume_is_rejected() {
    let h = Harness::new(
        ScriptedNodes::dirty().on(
            Verb::Compact,
            "n1:8080",
            Reply::After(Duration::from_secs(30), true),
        ),
        300,
    );

    let (first, second) = tokio::join!(h.vacuum(), h.vacuum());

    assert!(matches!(first, VolumeOutcome::CompactFailed { .. }));
    assert_eq!(second, VolumeOutcome::Busy);
    assert_eq!(h.nodes.count(Verb::Check), 3);
    assert!(h.coordinator.in_flight().is_empty());
}

#[tokio::test]
async fn test_sweep_without_garbage_changes_nothing() {
    let h = Harness::new(ScriptedNodes::clean(), 5_000);
    h.topology
        .register_volume("docs", Default::default(), VolumeId(2), ReplicaSet::new(["n1:8080"]), true)
        .unwrap();

    for _ in 0..2 {
        let report = h.coordinator.sweep(&h.topology).await;
        assert_eq!(report.volumes_total, 2);
        assert_eq!(report.checked, 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.compacted, 0);
        assert!(report.attention.is_empty());
    }

    assert_eq!(h.nodes.count(Verb::Compact), 0);
    assert_eq!(h.nodes.count(Verb::Commit), 0);
    assert!(h.layout.is_writable(VolumeId(1)));
    assert!(h.topology.lookup(VolumeId(2)).unwrap().is_writable(VolumeId(2)));
    assert_eq!(h.available(), NODES.to_vec());
}

#[tokio::test]
async fn test_sweep_aggregates_outcomes_across_layouts() {
    let nodes = ScriptedNodes::dirty()
        .on(Verb::Check, "clean:8080", Reply::No)
        .on(Verb::Compact, "broken:8080", Reply::Domain("io error"))
        .on(Verb::Commit, "flaky:8080", Reply::Transport);
    let h = Harness::new(nodes, 5_000);

    let topo = &h.topology;
    topo.register_volume("docs", Default::default(), VolumeId(2), ReplicaSet::new(["clean:8080"]), true)
        .unwrap();
    topo.register_volume("docs", "001".parse().unwrap(), VolumeId(3), ReplicaSet::new(["n1:8080", "broken:8080"]), true)
        .unwrap();
    topo.register_volume("logs", "001".parse().unwrap(), VolumeId(4), ReplicaSet::new(["n2:8080", "flaky:8080"]), true)
        .unwrap();

    let report = h.coordinator.sweep(topo).await;

    assert_eq!(report.volumes_total, 4);
    assert_eq!(report.checked, 4);
    assert_eq!(report.fully_committed, 1);
    assert_eq!(report.partially_committed, 1);
    assert_eq!(report.compacted, 2);
    assert_eq!(report.compact_failed, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.busy, 0);

    let attention: Vec<(VolumeId, &str)> = report
        .attention
        .iter()
        .map(|a| (a.volume, a.state.as_str()))
        .collect();
    assert_eq!(
        attention,
        vec![
            (VolumeId(3), "compact_failed"),
            (VolumeId(4), "partially_committed")
        ]
    );

    // Only volumes that passed the check left the writable set
    let writable = |vid: u32| topo.lookup(VolumeId(vid)).unwrap().is_writable(VolumeId(vid));
    assert!(!writable(1));
    assert!(writable(2));
    assert!(!writable(3));
    assert!(!writable(4));
}

#[tokio::test]
async fn test_sweep_respects_concurrency_cap() {
    let build = |limit: usize| {
        let nodes = Arc::new(ScriptedNodes::clean().with_delay(Duration::from_millis(50)));
        let topology = Topology::new();
        for vid in 1..=4 {
            topology
                .register_volume("", Default::default(), VolumeId(vid), ReplicaSet::new(["n1:8080"]), true)
                .unwrap();
        }
        let config = VacuumConfig {
            max_concurrent_volumes: limit,
            ..config(5_000)
        };
        (nodes.clone(), topology, VacuumCoordinator::new(nodes, config))
    };

    let (nodes, topology, coordinator) = build(1);
    let report = coordinator.sweep(&topology).await;
    assert_eq!(report.checked, 4);
    assert_eq!(nodes.max_active.load(Ordering::SeqCst), 1);

    let (nodes, topology, coordinator) = build(0);
    coordinator.sweep(&topology).await;
    assert!(nodes.max_active.load(Ordering::SeqCst) > 1);
}

#[tokio::test]
async fn test_sweep_threshold_override_reaches_nodes() {
    let h = Harness::new(ScriptedNodes::clean(), 5_000);

    let report = h.coordinator.sweep_with_threshold(&h.topology, 0.55).await;

    assert_eq!(report.garbage_threshold, 0.55);
    assert!(h.nodes.thresholds.lock().unwrap().iter().all(|t| *t == 0.55));
}
