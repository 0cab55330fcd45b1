// src/analysis/group_aggregator.rs
//
// Collects completed observations into groups of three distinct colors.
//
// A color contributes at most once per group; repeats are dropped until
// the group finalizes. Finalized groups are immutable snapshots kept in
// session history and handed to timing analysis and dispatch.

use super::track_registry::CompletedObservation;
use crate::types::{CubeColor, GROUP_SIZE};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizedGroup {
    pub group_number: u32,
    pub members: Vec<CompletedObservation>,
    /// Sum of member dwell times
    pub total_duration_ms: f64,
    /// Frame timestamp of finalization
    pub finalized_at_ms: f64,
    pub finalized_at: DateTime<Utc>,
    /// Flushed before reaching three members
    pub forced: bool,
}

impl FinalizedGroup {
    pub fn colors(&self) -> Vec<CubeColor> {
        self.members.iter().map(|m| m.color).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.members.len() == GROUP_SIZE
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AddOutcome {
    /// Appended; the group now holds `size` members
    Added { size: usize },
    /// Color already in the current group
    Duplicate,
    Finalized(FinalizedGroup),
}

#[derive(Debug)]
pub struct GroupAggregator {
    current: Vec<CompletedObservation>,
    group_number: u32,
    history: Vec<FinalizedGroup>,
}

impl Default for GroupAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupAggregator {
    pub fn new() -> Self {
        Self {
            current: Vec::with_capacity(GROUP_SIZE),
            group_number: 1,
            history: Vec::new(),
        }
    }

    pub fn add(&mut self, obs: CompletedObservation, now_ms: f64) -> AddOutcome {
        if self.current.iter().any(|m| m.color == obs.color) {
            debug!(
                "Group {}: {} already present, dropping repeat",
                self.group_number, obs.color
            );
            return AddOutcome::Duplicate;
        }

        self.current.push(obs);
        if self.current.len() == GROUP_SIZE {
            return AddOutcome::Finalized(self.finalize(now_ms, false));
        }

        debug!(
            "Group {}: {}/{} members",
            self.group_number,
            self.current.len(),
            GROUP_SIZE
        );
        AddOutcome::Added {
            size: self.current.len(),
        }
    }

    /// Finalize a partial group. No-op when the current group is empty.
    pub fn force_finalize(&mut self, now_ms: f64) -> Option<FinalizedGroup> {
        if self.current.is_empty() {
            return None;
        }
        Some(self.finalize(now_ms, true))
    }

    fn finalize(&mut self, now_ms: f64, forced: bool) -> FinalizedGroup {
        let members = std::mem::replace(&mut self.current, Vec::with_capacity(GROUP_SIZE));
        let total_duration_ms = members.iter().map(|m| m.dwell_ms).sum();

        let group = FinalizedGroup {
            group_number: self.group_number,
            members,
            total_duration_ms,
            finalized_at_ms: now_ms,
            finalized_at: Utc::now(),
            forced,
        };

        info!(
            "🎯 Group {} finalized{}: {} | total {:.2}s",
            group.group_number,
            if forced { " (forced)" } else { "" },
            group
                .members
                .iter()
                .map(|m| format!("{}({:.1}s)", m.color, m.dwell_ms / 1000.0))
                .collect::<Vec<_>>()
                .join(", "),
            group.total_duration_ms / 1000.0
        );

        self.history.push(group.clone());
        self.group_number += 1;
        group
    }

    pub fn current_members(&self) -> &[CompletedObservation] {
        &self.current
    }

    /// Number the current (accumulating) group will carry.
    pub fn group_number(&self) -> u32 {
        self.group_number
    }

    pub fn history(&self) -> &[FinalizedGroup] {
        &self.history
    }
}
