// file: src/benchmark.rs
// description: Timing helpers for per-batch generation and whole-run throughput.
// author: cipher-rc5

use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct BenchmarkResult {
    pub operation: String,
    pub duration: Duration,
    pub throughput: Option<f64>,
}

pub struct Benchmark {
    start: Instant,
    operation: String,
}

impl Benchmark {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            operation: operation.into(),
        }
    }

    /// Logs at debug level; used once per batch.
    pub fn finish_with_sequences(self, num_sequences: usize) -> BenchmarkResult {
        let duration = self.start.elapsed();
        let per_sec = num_sequences as f64 / duration.as_secs_f64().max(1e-9);

        debug!(
            "{} took {:?} ({:.2} sequences/sec)",
            self.operation, duration, per_sec
        );

        BenchmarkResult {
            operation: self.operation,
            duration,
            throughput: Some(per_sec),
        }
    }
}

/// Per-batch totals plus the wall clock since the run started.
#[derive(Debug, Clone)]
pub struct RunMetrics {
    pub batches: usize,
    pub sequences: usize,
    pub generation_time: Duration,
    started: Instant,
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self {
            batches: 0,
            sequences: 0,
            generation_time: Duration::ZERO,
            started: Instant::now(),
        }
    }
}

impl RunMetrics {
    pub fn wall_time(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn record(&mut self, result: &BenchmarkResult, sequences: usize) {
        self.batches += 1;
        self.sequences += sequences;
        self.generation_time += result.duration;
    }

    pub fn print(&self) {
        let secs = self.generation_time.as_secs_f64();
        info!("Generation metrics:");
        info!("  Batches: {}", self.batches);
        info!("  Sequences generated: {}", self.sequences);
        info!("  Total generation time: {:?}", self.generation_time);
        info!("  Wall time: {:?}", self.wall_time());
        if secs > 0.0 {
            info!("  Throughput: {:.2} sequences/sec", self.sequences as f64 / secs);
        }
    }
}
