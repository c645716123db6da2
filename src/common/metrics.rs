//! Vacuum metrics
//!
//! Prometheus-compatible counters, gauges and histograms for:
//! - sweeps and per-volume outcomes
//! - RPC failures by phase and kind
//! - phase and sweep durations

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for phase and sweep durations (in seconds)
const DURATION_BUCKETS: [f64; 11] = [
    0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0,
];

/// A simple histogram implementation for duration tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a new histogram with default duration buckets
    pub fn new() -> Self {
        Self::with_buckets(&DURATION_BUCKETS)
    }

    /// Create a histogram with custom bucket boundaries
    pub fn with_buckets(boundaries: &[f64]) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries: boundaries.to_vec(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in the histogram
    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        // Stored in thousandths for precision
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative buckets for Prometheus format
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        // +Inf bucket
        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    /// RPC failures keyed by (phase, error kind)
    rpc_failures: Mutex<BTreeMap<(&'static str, &'static str), Arc<Counter>>>,
    /// Phase durations keyed by phase
    phase_durations: Mutex<BTreeMap<&'static str, Arc<Histogram>>>,

    pub sweeps_total: Counter,
    pub volumes_checked: Counter,
    pub volumes_compacted: Counter,
    pub volumes_fully_committed: Counter,
    pub volumes_partially_committed: Counter,
    pub volumes_compact_failed: Counter,
    pub volumes_skipped: Counter,
    pub volumes_busy: Counter,
    pub volumes_interrupted: Counter,

    pub volumes_in_flight: Gauge,
    pub sweep_duration: Histogram,

    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            rpc_failures: Mutex::new(BTreeMap::new()),
            phase_durations: Mutex::new(BTreeMap::new()),
            sweeps_total: Counter::new(),
            volumes_checked: Counter::new(),
            volumes_compacted: Counter::new(),
            volumes_fully_committed: Counter::new(),
            volumes_partially_committed: Counter::new(),
            volumes_compact_failed: Counter::new(),
            volumes_skipped: Counter::new(),
            volumes_busy: Counter::new(),
            volumes_interrupted: Counter::new(),
            volumes_in_flight: Gauge::new(),
            sweep_duration: Histogram::new(),
            start_time: Instant::now(),
        }
    }

    pub fn record_rpc_failure(&self, phase: &'static str, kind: &'static str) {
        self.rpc_failures
            .lock()
            .entry((phase, kind))
            .or_insert_with(|| Arc::new(Counter::new()))
            .inc();
    }

    pub fn rpc_failures(&self, phase: &'static str, kind: &'static str) -> u64 {
        self.rpc_failures
            .lock()
            .get(&(phase, kind))
            .map(|c| c.get())
            .unwrap_or(0)
    }

    pub fn record_phase(&self, phase: &'static str, duration: Duration) {
        let histogram = self
            .phase_durations
            .lock()
            .entry(phase)
            .or_insert_with(|| Arc::new(Histogram::new()))
            .clone();
        histogram.observe(duration.as_secs_f64());
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();

        let counters = [
            ("minivac_sweeps_total", "Vacuum sweeps run", &self.sweeps_total),
            ("minivac_volumes_checked_total", "Volumes that went through the check phase", &self.volumes_checked),
            ("minivac_volumes_compacted_total", "Volumes compacted on every replica", &self.volumes_compacted),
            ("minivac_volumes_fully_committed_total", "Volumes committed on every replica", &self.volumes_fully_committed),
            ("minivac_volumes_partially_committed_total", "Volumes committed on some replicas only", &self.volumes_partially_committed),
            ("minivac_volumes_compact_failed_total", "Volumes whose compaction failed", &self.volumes_compact_failed),
            ("minivac_volumes_skipped_total", "Volumes not needing or not cleared for vacuum", &self.volumes_skipped),
            ("minivac_volumes_busy_total", "Volumes skipped because a vacuum was already running", &self.volumes_busy),
            ("minivac_volumes_interrupted_total", "Vacuum passes cancelled before reaching an outcome", &self.volumes_interrupted),
        ];
        for (name, help, counter) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, counter.get());
        }

        out.push_str("# HELP minivac_volumes_in_flight Volumes currently being vacuumed\n");
        out.push_str("# TYPE minivac_volumes_in_flight gauge\n");
        let _ = writeln!(out, "minivac_volumes_in_flight {}", self.volumes_in_flight.get());

        out.push_str("# HELP minivac_uptime_seconds Coordinator uptime in seconds\n");
        out.push_str("# TYPE minivac_uptime_seconds gauge\n");
        let _ = writeln!(out, "minivac_uptime_seconds {}", self.uptime_seconds());

        out.push_str("# HELP minivac_rpc_failures_total Vacuum RPC failures by phase and kind\n");
        out.push_str("# TYPE minivac_rpc_failures_total counter\n");
        for ((phase, kind), counter) in self.rpc_failures.lock().iter() {
            let _ = writeln!(
                out,
                "minivac_rpc_failures_total{{phase=\"{}\",kind=\"{}\"}} {}",
                phase,
                kind,
                counter.get()
            );
        }

        out.push_str("# HELP minivac_sweep_duration_seconds Sweep duration in seconds\n");
        out.push_str("# TYPE minivac_sweep_duration_seconds histogram\n");
        write_histogram(&mut out, "minivac_sweep_duration_seconds", None, &self.sweep_duration);

        out.push_str("# HELP minivac_phase_duration_seconds Protocol phase duration in seconds\n");
        out.push_str("# TYPE minivac_phase_duration_seconds histogram\n");
        for (phase, histogram) in self.phase_durations.lock().iter() {
            write_histogram(
                &mut out,
                "minivac_phase_duration_seconds",
                Some(("phase", phase)),
                histogram,
            );
        }

        out
    }
}

fn write_histogram(out: &mut String, name: &str, label: Option<(&str, &str)>, histogram: &Histogram) {
    use std::fmt::Write;
    let prefix = label
        .map(|(k, v)| format!("{}=\"{}\",", k, v))
        .unwrap_or_default();
    let plain = label
        .map(|(k, v)| format!("{{{}=\"{}\"}}", k, v))
        .unwrap_or_default();

    for (le, count) in histogram.get_buckets() {
        let le = if le.is_infinite() {
            "+Inf".to_string()
        } else {
            le.to_string()
        };
        let _ = writeln!(out, "{}_bucket{{{}le=\"{}\"}} {}", name, prefix, le, count);
    }
    let _ = writeln!(out, "{}_sum{} {}", name, plain, histogram.sum());
    let _ = writeln!(out, "{}_count{} {}", name, plain, histogram.count());
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<MetricsRegistry> =
    once_cell::sync::Lazy::new(MetricsRegistry::new);
