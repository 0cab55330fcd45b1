// src/pipeline/metrics.rs
//
// Counters shared between the frame loop and dispatch tasks. Clones share
// the same atomics, so a spawned dispatch can report its outcome without
// touching tracker state.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub qualifying_observations: Arc<AtomicU64>,
    pub rejected_observations: Arc<AtomicU64>,
    pub promotions: Arc<AtomicU64>,
    pub discarded_pending: Arc<AtomicU64>,
    pub exits: Arc<AtomicU64>,
    pub duplicate_drops: Arc<AtomicU64>,
    pub finalized_groups: Arc<AtomicU64>,
    pub dispatch_delivered: Arc<AtomicU64>,
    pub dispatch_failed: Arc<AtomicU64>,
    pub dispatch_skipped: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            qualifying_observations: Arc::new(AtomicU64::new(0)),
            rejected_observations: Arc::new(AtomicU64::new(0)),
            promotions: Arc::new(AtomicU64::new(0)),
            discarded_pending: Arc::new(AtomicU64::new(0)),
            exits: Arc::new(AtomicU64::new(0)),
            duplicate_drops: Arc::new(AtomicU64::new(0)),
            finalized_groups: Arc::new(AtomicU64::new(0)),
            dispatch_delivered: Arc::new(AtomicU64::new(0)),
            dispatch_failed: Arc::new(AtomicU64::new(0)),
            dispatch_skipped: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: Self::get(&self.total_frames),
            fps: self.fps(),
            qualifying_observations: Self::get(&self.qualifying_observations),
            rejected_observations: Self::get(&self.rejected_observations),
            promotions: Self::get(&self.promotions),
            discarded_pending: Self::get(&self.discarded_pending),
            exits: Self::get(&self.exits),
            duplicate_drops: Self::get(&self.duplicate_drops),
            finalized_groups: Self::get(&self.finalized_groups),
            dispatch_delivered: Self::get(&self.dispatch_delivered),
            dispatch_failed: Self::get(&self.dispatch_failed),
            dispatch_skipped: Self::get(&self.dispatch_skipped),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub fps: f64,
    pub qualifying_observations: u64,
    pub rejected_observations: u64,
    pub promotions: u64,
    pub discarded_pending: u64,
    pub exits: u64,
    pub duplicate_drops: u64,
    pub finalized_groups: u64,
    pub dispatch_delivered: u64,
    pub dispatch_failed: u64,
    pub dispatch_skipped: u64,
    pub elapsed_secs: f64,
}
