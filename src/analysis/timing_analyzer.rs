// src/analysis/timing_analyzer.rs
//
// Compares a finalized group against the expected per-cube and per-group
// times. Pure: produces a report, nothing else.

use super::group_aggregator::FinalizedGroup;
use crate::types::{CubeColor, TimingConfig};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimingVerdict {
    Early,
    OnTime,
    Late,
}

impl TimingVerdict {
    /// Late if `deviation > tolerance`, early if `deviation < -tolerance`.
    pub fn classify(deviation_ms: f64, tolerance_ms: f64) -> Self {
        if deviation_ms > tolerance_ms {
            Self::Late
        } else if deviation_ms < -tolerance_ms {
            Self::Early
        } else {
            Self::OnTime
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Early => "EARLY",
            Self::OnTime => "ON_TIME",
            Self::Late => "LATE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberTiming {
    pub color: CubeColor,
    pub dwell_ms: f64,
    pub deviation_ms: f64,
    pub verdict: TimingVerdict,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingReport {
    pub group_number: u32,
    pub members: Vec<MemberTiming>,
    pub total_ms: f64,
    pub expected_total_ms: f64,
    pub total_deviation_ms: f64,
    pub verdict: TimingVerdict,
}

impl TimingReport {
    /// Members whose own verdict matches the group's, i.e. the cubes that
    /// pushed a late group late or an early group early.
    pub fn contributors(&self) -> Vec<&MemberTiming> {
        if self.verdict == TimingVerdict::OnTime {
            return Vec::new();
        }
        self.members
            .iter()
            .filter(|m| m.verdict == self.verdict)
            .collect()
    }
}

pub fn analyze_group(group: &FinalizedGroup, config: &TimingConfig) -> TimingReport {
    let members = group
        .members
        .iter()
        .map(|m| {
            let deviation_ms = m.dwell_ms - config.expected_item_ms;
            MemberTiming {
                color: m.color,
                dwell_ms: m.dwell_ms,
                deviation_ms,
                verdict: TimingVerdict::classify(deviation_ms, config.tolerance_ms),
            }
        })
        .collect();

    let expected_total_ms = config.expected_group_ms();
    let total_deviation_ms = group.total_duration_ms - expected_total_ms;

    TimingReport {
        group_number: group.group_number,
        members,
        total_ms: group.total_duration_ms,
        expected_total_ms,
        total_deviation_ms,
        verdict: TimingVerdict::classify(total_deviation_ms, config.tolerance_ms),
    }
}
