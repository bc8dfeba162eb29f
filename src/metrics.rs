//! Pipeline latency tracking.
//!
//! Each stage (whole translate call, provider round trip, batch, cache
//! sweep) keeps a bounded window of recent durations; percentiles are
//! computed on demand and surfaced through the service statistics.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Pipeline stages with latency windows.
pub mod stage {
    pub const TRANSLATE: &str = "translate";
    pub const PROVIDER_CALL: &str = "provider_call";
    pub const BATCH: &str = "batch";
    pub const CACHE_SWEEP: &str = "cache_sweep";
}

const DEFAULT_WINDOW: usize = 1_024;

/// Running stopwatch for one stage. Dropping it without `stop` records nothing,
/// so failed calls stay out of the window.
pub struct StageTimer {
    stage: &'static str,
    started: Instant,
    registry: Arc<MetricsRegistry>,
}

impl StageTimer {
    pub fn stop(self) -> Duration {
        let elapsed = self.started.elapsed();
        self.registry.observe(self.stage, elapsed);
        elapsed
    }
}

/// Most recent `capacity` durations of one stage, oldest first.
struct LatencyWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
    total: u64,
}

impl LatencyWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            total: 0,
        }
    }

    fn push(&mut self, sample: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.total += 1;
    }

    fn summary(&self) -> LatencySummary {
        let mut sorted: Vec<Duration> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let pick = |p: f64| -> f64 {
            if sorted.is_empty() {
                return 0.0;
            }
            // nearest rank
            let rank = (p * sorted.len() as f64 / 100.0).ceil() as usize;
            sorted[rank.clamp(1, sorted.len()) - 1].as_micros() as f64 / 1_000.0
        };
        LatencySummary {
            observed: self.total,
            p50_ms: pick(50.0),
            p95_ms: pick(95.0),
            p99_ms: pick(99.0),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    /// Samples ever observed, including those pushed out of the window.
    pub observed: u64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

pub struct MetricsRegistry {
    windows: Mutex<HashMap<&'static str, LatencyWindow>>,
    window_size: usize,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    pub fn with_window(window_size: usize) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window_size: window_size.max(1),
        }
    }

    pub fn observe(&self, stage: &'static str, elapsed: Duration) {
        self.windows
            .lock()
            .entry(stage)
            .or_insert_with(|| LatencyWindow::new(self.window_size))
            .push(elapsed);
        tracing::trace!(stage, elapsed_us = elapsed.as_micros() as u64, "latency observed");
    }

    pub fn start(self: &Arc<Self>, stage: &'static str) -> StageTimer {
        StageTimer {
            stage,
            started: Instant::now(),
            registry: Arc::clone(self),
        }
    }

    pub fn summary(&self, stage: &str) -> Option<LatencySummary> {
        self.windows.lock().get(stage).map(LatencyWindow::summary)
    }

    /// Every stage seen so far, keyed by name.
    pub fn snapshot(&self) -> BTreeMap<String, LatencySummary> {
        self.windows
            .lock()
            .iter()
            .map(|(stage, window)| (stage.to_string(), window.summary()))
            .collect()
    }
}
