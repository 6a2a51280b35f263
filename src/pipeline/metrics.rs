//! Work unit counters and timing.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for the pipeline.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Units handed to the stage executor
    pub units_dispatched: AtomicU64,

    /// Units that completed successfully and were kept
    pub units_succeeded: AtomicU64,

    /// Units that failed
    pub units_failed: AtomicU64,

    /// Units that succeeded after a sibling had already failed the stage
    pub units_discarded: AtomicU64,

    /// Start time
    start_time: Option<Instant>,

    /// Time spent in external converter processes (microseconds)
    pub process_us: AtomicU64,

    /// Time spent in geometry engine invocations (microseconds)
    pub engine_us: AtomicU64,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    pub fn add_dispatched(&self) {
        self.units_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_succeeded(&self) {
        self.units_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_failed(&self) {
        self.units_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_discarded(&self) {
        self.units_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record time spent in a converter process (in microseconds).
    pub fn add_process_time(&self, duration: Duration) {
        self.process_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record time spent in an engine invocation (in microseconds).
    pub fn add_engine_time(&self, duration: Duration) {
        self.engine_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            units_dispatched: self.units_dispatched.load(Ordering::Relaxed),
            units_succeeded: self.units_succeeded.load(Ordering::Relaxed),
            units_failed: self.units_failed.load(Ordering::Relaxed),
            units_discarded: self.units_discarded.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            process_secs: self.process_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            engine_secs: self.engine_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub units_dispatched: u64,
    pub units_succeeded: u64,
    pub units_failed: u64,
    pub units_discarded: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    /// Total time inside converter processes (seconds, summed across units)
    pub process_secs: f64,
    /// Total time inside engine invocations (seconds, summed across units)
    pub engine_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Units: {} dispatched, {} succeeded, {} failed, {} discarded | \
             Time: converter {:.1}s, engine {:.1}s | Elapsed: {:.1}s",
            self.units_dispatched,
            self.units_succeeded,
            self.units_failed,
            self.units_discarded,
            self.process_secs,
            self.engine_secs,
            self.elapsed.as_secs_f64(),
        )
    }
}
