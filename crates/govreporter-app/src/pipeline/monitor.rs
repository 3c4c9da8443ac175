//! Ingestion run accounting: counts, throughput, and an ETA derived from a
//! moving average over recent completions.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Completions the moving average looks back over.
const MOVING_AVERAGE_WINDOW: usize = 50;

#[derive(Debug)]
pub struct IngestMonitor {
    started: Instant,
    total: usize,
    completed: usize,
    failed: usize,
    skipped: usize,
    duplicates: usize,
    chunks_written: usize,
    recent: VecDeque<Duration>,
}

impl IngestMonitor {
    pub fn new(total: usize) -> Self {
        Self {
            started: Instant::now(),
            total,
            completed: 0,
            failed: 0,
            skipped: 0,
            duplicates: 0,
            chunks_written: 0,
            recent: VecDeque::with_capacity(MOVING_AVERAGE_WINDOW),
        }
    }

    pub fn record_completion(&mut self, duration: Duration, chunks: usize) {
        self.completed += 1;
        self.chunks_written += chunks;
        if self.recent.len() == MOVING_AVERAGE_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(duration);
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    pub fn record_duplicate(&mut self) {
        self.duplicates += 1;
    }

    pub fn processed(&self) -> usize {
        self.completed + self.failed + self.skipped + self.duplicates
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.processed())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Documents per minute over the whole run.
    pub fn throughput_per_minute(&self) -> f64 {
        let minutes = self.elapsed().as_secs_f64() / 60.0;
        if minutes <= 0.0 {
            0.0
        } else {
            self.processed() as f64 / minutes
        }
    }

    /// ETA from the moving average of the last completions; `None` until at
    /// least one document has completed.
    pub fn eta(&self) -> Option<Duration> {
        if self.recent.is_empty() {
            return None;
        }
        let sum: Duration = self.recent.iter().sum();
        let average = sum / self.recent.len() as u32;
        Some(average * self.remaining() as u32)
    }

    pub fn summary(&self) -> IngestSummary {
        IngestSummary {
            discovered: self.total,
            completed: self.completed,
            failed: self.failed,
            skipped: self.skipped,
            duplicates: self.duplicates,
            chunks_written: self.chunks_written,
            elapsed: self.elapsed(),
        }
    }
}

/// End-of-run tallies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub discovered: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub chunks_written: usize,
    pub elapsed: Duration,
}
