// src/session.rs
//
// Session history export: every completed observation, finalized groups,
// the group still accumulating, and per-color dwell totals. Built on demand
// from a snapshot of tracker state; never shared back into it.

use crate::analysis::group_aggregator::{FinalizedGroup, GroupAggregator};
use crate::analysis::timing_analyzer::{analyze_group, TimingReport};
use crate::analysis::track_registry::{CompletedObservation, TrackRegistry};
use crate::pipeline::MetricsSummary;
use crate::types::{CubeColor, TimingConfig};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct SessionTotals {
    pub groups: usize,
    pub observations: usize,
    pub total_duration_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub generated_at: DateTime<Utc>,
    /// Every exit, grouped or not
    pub observations: Vec<CompletedObservation>,
    pub groups: Vec<FinalizedGroup>,
    pub timing: Vec<TimingReport>,
    /// Number the accumulating group will carry when it finalizes
    pub current_group_number: u32,
    pub current_group: Vec<CompletedObservation>,
    pub color_totals_ms: BTreeMap<CubeColor, f64>,
    pub totals: SessionTotals,
    pub metrics: MetricsSummary,
}

impl SessionReport {
    pub fn capture(
        aggregator: &GroupAggregator,
        registry: &TrackRegistry,
        timing: &TimingConfig,
        metrics: MetricsSummary,
    ) -> Self {
        let observations = registry.completed().to_vec();
        let groups = aggregator.history().to_vec();
        let timing_reports = groups.iter().map(|g| analyze_group(g, timing)).collect();

        let totals = SessionTotals {
            groups: groups.len(),
            observations: observations.len(),
            total_duration_ms: observations.iter().map(|o| o.dwell_ms).sum(),
        };

        Self {
            generated_at: Utc::now(),
            observations,
            groups,
            timing: timing_reports,
            current_group_number: aggregator.group_number(),
            current_group: aggregator.current_members().to_vec(),
            color_totals_ms: registry.color_totals_ms().clone(),
            totals,
            metrics,
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize session")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("💾 Session report written to {}", path.display());
        Ok(())
    }
}

/// One line per finalized group in the results file.
#[derive(Debug, Serialize)]
pub struct GroupRecord<'a> {
    pub group: &'a FinalizedGroup,
    pub timing: &'a TimingReport,
    pub dispatched: bool,
}

pub fn save_group_record(record: &GroupRecord<'_>, file: &mut std::fs::File) -> Result<()> {
    let json_line = serde_json::to_string(record)?;
    writeln!(file, "{}", json_line)?;
    file.flush()?;
    info!("💾 Group {} saved to JSONL", record.group.group_number);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::confirmation::Promotion;
    use crate::analysis::track_registry::RegistryConfig;
    use crate::pipeline::PipelineMetrics;

    fn exit(
        registry: &mut TrackRegistry,
        color: CubeColor,
        entry_ms: f64,
        seen_ms: f64,
    ) -> CompletedObservation {
        registry.activate(&Promotion {
            color,
            entry_ms,
            confirmed_ms: seen_ms,
            frames: 6,
            bbox: [0.0; 4],
        });
        registry.begin_frame(seen_ms + 100.0);
        registry.end_frame(seen_ms + 100.0).remove(0)
    }

    #[test]
    fn test_capture_history_and_current_group() {
        let mut registry = TrackRegistry::new(RegistryConfig {
            min_exit_frames: 1,
            cooldown_ms: 0.0,
        });
        let mut aggregator = GroupAggregator::new();

        for (color, dwell) in [
            (CubeColor::Red, 4000.0),
            (CubeColor::Blue, 5000.0),
            (CubeColor::Green, 6000.0),
            (CubeColor::White, 3000.0),
        ] {
            let obs = exit(&mut registry, color, 0.0, dwell);
            aggregator.add(obs, dwell);
        }

        let report = SessionReport::capture(
            &aggregator,
            &registry,
            &TimingConfig::default(),
            PipelineMetrics::new().summary(),
        );

        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.timing.len(), 1);
        assert_eq!(report.totals.observations, 4);
        assert_eq!(report.totals.total_duration_ms, 18_000.0);
        assert_eq!(report.observations.len(), 4);
        assert_eq!(report.observations[3].color, CubeColor::White);
        assert_eq!(report.groups[0].total_duration_ms, 15_000.0);
        assert_eq!(report.current_group_number, 2);
        assert_eq!(report.current_group.len(), 1);
        assert_eq!(report.current_group[0].color, CubeColor::White);
        assert_eq!(report.color_totals_ms[&CubeColor::Blue], 5000.0);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["color_totals_ms"]["white"], 3000.0);
        assert_eq!(json["groups"][0]["members"][0]["derived_label"], "Top");
    }
}
