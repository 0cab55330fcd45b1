use crate::types::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::warn;

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Report inconsistent settings. Each problem is logged; none is fatal.
    pub fn validate(&self) -> Vec<String> {
        let det = &self.detection;
        let timing = &self.timing;
        let mut warnings = Vec::new();

        if !(0.0..1.0).contains(&det.confidence_threshold) {
            warnings.push(format!(
                "confidence_threshold ({}) should be within [0, 1)",
                det.confidence_threshold
            ));
        }
        if det.min_consecutive_frames == 0 || det.fast_detection_frames == 0 {
            warnings.push("confirmation frame counts should be at least 1".to_string());
        }
        if det.fast_detection_duration_ms > det.min_detection_duration_ms
            || det.fast_detection_frames > det.min_consecutive_frames
        {
            warnings.push(format!(
                "fast profile ({:.0}ms/{} frames) is slower than normal ({:.0}ms/{} frames)",
                det.fast_detection_duration_ms,
                det.fast_detection_frames,
                det.min_detection_duration_ms,
                det.min_consecutive_frames
            ));
        }
        if det.min_exit_frames == 0 {
            warnings.push("min_exit_frames of 0 would exit tracks on their first frame".to_string());
        }
        if det.cooldown_ms < 0.0 {
            warnings.push(format!("cooldown_ms ({}) is negative", det.cooldown_ms));
        }
        if timing.expected_item_ms <= 0.0 {
            warnings.push(format!(
                "expected_item_ms ({}) should be positive",
                timing.expected_item_ms
            ));
        }
        if timing.tolerance_ms <= 0.0 {
            warnings.push(format!(
                "tolerance_ms ({}) should be positive",
                timing.tolerance_ms
            ));
        }

        for w in &warnings {
            warn!("⚠️  Config: {}", w);
        }
        warnings
    }
}
