//! Scheduler metrics
//!
//! Per-completion latency and cache-hit outcomes, with CSV export for
//! offline analysis.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics export failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One completed task: wall-clock end time (unix seconds), latency, and
/// whether the result came from a full cache hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricEvent {
    pub t_end: f64,
    pub latency_ms: f64,
    pub cache_hit: bool,
}

/// Consistent view of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub task_started: u64,
    pub task_completed: u64,
    pub cache_hit_rate: f64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Default)]
struct MetricsInner {
    started: u64,
    completed: u64,
    full_hits: u64,
    events: Vec<MetricEvent>,
}

/// Thread-safe metrics recorder for the scheduler.
#[derive(Debug, Default)]
pub struct Metrics {
    inner: Mutex<MetricsInner>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A task was enqueued.
    pub fn on_submit(&self) {
        self.lock().started += 1;
    }

    /// A task completed, `cache_hit` when served from the fast path.
    pub fn on_complete(&self, latency_ms: f64, cache_hit: bool) {
        let t_end = Utc::now().timestamp_micros() as f64 / 1e6;
        let mut inner = self.lock();
        inner.completed += 1;
        if cache_hit {
            inner.full_hits += 1;
        }
        inner.events.push(MetricEvent {
            t_end,
            latency_ms,
            cache_hit,
        });
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.lock();
        Self::summarize(&inner)
    }

    /// Copy of all recorded events, in completion order.
    pub fn events(&self) -> Vec<MetricEvent> {
        self.lock().events.clone()
    }

    /// Write `events.csv` and `summary.csv` under `outdir`, creating the
    /// directory if needed. Both files reflect one consistent snapshot.
    pub fn write_csv(&self, outdir: &Path) -> Result<(), MetricsError> {
        let (events, summary) = {
            let inner = self.lock();
            (inner.events.clone(), Self::summarize(&inner))
        };

        std::fs::create_dir_all(outdir)?;

        let mut events_file = BufWriter::new(File::create(outdir.join("events.csv"))?);
        writeln!(events_file, "t_end,latency_ms,cache_hit")?;
        for e in &events {
            writeln!(
                events_file,
                "{:.6},{:.3},{}",
                e.t_end,
                e.latency_ms,
                u8::from(e.cache_hit)
            )?;
        }
        events_file.flush()?;

        let mut summary_file = BufWriter::new(File::create(outdir.join("summary.csv"))?);
        writeln!(
            summary_file,
            "task_started,task_completed,cache_hit_rate,avg_latency_ms"
        )?;
        writeln!(
            summary_file,
            "{},{},{},{}",
            summary.task_started,
            summary.task_completed,
            summary.cache_hit_rate,
            summary.avg_latency_ms
        )?;
        summary_file.flush()?;
        Ok(())
    }

    fn summarize(inner: &MetricsInner) -> MetricsSnapshot {
        let completed = inner.completed;
        let (hit_rate, avg_latency) = if completed > 0 {
            let total_latency: f64 = inner.events.iter().map(|e| e.latency_ms).sum();
            (
                inner.full_hits as f64 / completed as f64,
                total_latency / completed as f64,
            )
        } else {
            (0.0, 0.0)
        };
        MetricsSnapshot {
            task_started: inner.started,
            task_completed: completed,
            cache_hit_rate: hit_rate,
            avg_latency_ms: avg_latency,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MetricsInner> {
        self.inner.lock().expect("metrics lock poisoned")
    }
}
