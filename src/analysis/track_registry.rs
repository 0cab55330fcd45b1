// src/analysis/track_registry.rs
//
// Confirmed cubes currently in view, one per color.
//
// Exit is debounced the same way entry is: a track must go unseen for
// `min_exit_frames` consecutive frames before it counts as gone. Dwell
// is measured to the last frame the cube was actually seen, so the exit
// debounce never inflates it.
//
// After an exit the color is put on cooldown. A cube lingering at the
// frame edge would otherwise be re-confirmed immediately.

use super::confirmation::Promotion;
use crate::types::{BoundingBox, CubeColor};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTrack {
    pub color: CubeColor,
    /// First sighting of the pending detection that confirmed this track
    pub entry_ms: f64,
    pub confirmed_ms: f64,
    pub last_seen_ms: f64,
    pub last_bbox: BoundingBox,
    pub seen_this_frame: bool,
    pub frames_since_seen: u32,
}

impl ActiveTrack {
    fn from_promotion(p: &Promotion) -> Self {
        Self {
            color: p.color,
            entry_ms: p.entry_ms,
            confirmed_ms: p.confirmed_ms,
            last_seen_ms: p.confirmed_ms,
            last_bbox: p.bbox,
            seen_this_frame: true,
            frames_since_seen: 0,
        }
    }

    /// Time in view as of the last sighting.
    pub fn dwell_ms(&self) -> f64 {
        self.last_seen_ms - self.entry_ms
    }
}

/// A cube that entered, stayed, and left. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedObservation {
    pub color: CubeColor,
    pub derived_label: &'static str,
    pub entry_ms: f64,
    pub last_seen_ms: f64,
    /// `last_seen_ms - entry_ms`
    pub dwell_ms: f64,
    /// Running total for this color across the session, including this one
    pub cumulative_dwell_ms: f64,
    /// Frame timestamp at which the exit was confirmed
    pub exited_ms: f64,
}

// ============================================================================
// COOLDOWN
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct CooldownTable {
    suppressed_until: BTreeMap<CubeColor, f64>,
}

impl CooldownTable {
    pub fn insert(&mut self, color: CubeColor, until_ms: f64) {
        self.suppressed_until.insert(color, until_ms);
    }

    pub fn is_active(&self, color: CubeColor, now_ms: f64) -> bool {
        self.suppressed_until
            .get(&color)
            .is_some_and(|until| now_ms < *until)
    }

    /// Drop elapsed entries.
    pub fn prune(&mut self, now_ms: f64) {
        self.suppressed_until.retain(|_, until| now_ms < *until);
    }

    pub fn suppressed_until(&self, color: CubeColor) -> Option<f64> {
        self.suppressed_until.get(&color).copied()
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Consecutive unseen frames that confirm an exit
    pub min_exit_frames: u32,
    /// Re-entry suppression after an exit
    pub cooldown_ms: f64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            min_exit_frames: 10,
            cooldown_ms: 2000.0,
        }
    }
}

#[derive(Debug)]
pub struct TrackRegistry {
    config: RegistryConfig,
    tracks: BTreeMap<CubeColor, ActiveTrack>,
    cooldowns: CooldownTable,
    color_totals_ms: BTreeMap<CubeColor, f64>,
    /// Every exit of the session, in order
    completed: Vec<CompletedObservation>,
}

impl TrackRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            tracks: BTreeMap::new(),
            cooldowns: CooldownTable::default(),
            color_totals_ms: BTreeMap::new(),
            completed: Vec::new(),
        }
    }

    /// Clear per-frame sighting flags.
    pub fn begin_frame(&mut self, now_ms: f64) {
        for track in self.tracks.values_mut() {
            track.seen_this_frame = false;
        }
        self.cooldowns.prune(now_ms);
    }

    pub fn contains(&self, color: CubeColor) -> bool {
        self.tracks.contains_key(&color)
    }

    pub fn in_cooldown(&self, color: CubeColor, now_ms: f64) -> bool {
        self.cooldowns.is_active(color, now_ms)
    }

    /// Re-detection of a confirmed cube; cancels any exit progress.
    /// Returns false if the color has no active track.
    pub fn mark_seen(&mut self, color: CubeColor, bbox: BoundingBox, now_ms: f64) -> bool {
        let Some(track) = self.tracks.get_mut(&color) else {
            return false;
        };
        track.last_seen_ms = now_ms;
        track.last_bbox = bbox;
        track.seen_this_frame = true;
        track.frames_since_seen = 0;
        true
    }

    pub fn activate(&mut self, promotion: &Promotion) {
        debug_assert!(!self.tracks.contains_key(&promotion.color));
        info!(
            "🟢 {} entered (entry {:.0}ms, confirmed {:.0}ms)",
            promotion.color, promotion.entry_ms, promotion.confirmed_ms
        );
        self.tracks
            .insert(promotion.color, ActiveTrack::from_promotion(promotion));
    }

    /// Age unseen tracks and retire those that reached the exit threshold.
    pub fn end_frame(&mut self, now_ms: f64) -> Vec<CompletedObservation> {
        let mut exited = Vec::new();

        for (color, track) in self.tracks.iter_mut() {
            if track.seen_this_frame {
                continue;
            }
            track.frames_since_seen += 1;
            if track.frames_since_seen >= self.config.min_exit_frames {
                exited.push(*color);
            } else {
                debug!(
                    "{}: {}/{} frames unseen",
                    color, track.frames_since_seen, self.config.min_exit_frames
                );
            }
        }

        exited
            .into_iter()
            .filter_map(|color| self.retire(color, now_ms))
            .collect()
    }

    fn retire(&mut self, color: CubeColor, now_ms: f64) -> Option<CompletedObservation> {
        let track = self.tracks.remove(&color)?;
        let dwell_ms = track.dwell_ms();

        let total = self.color_totals_ms.entry(color).or_insert(0.0);
        *total += dwell_ms;

        self.cooldowns.insert(color, now_ms + self.config.cooldown_ms);

        info!(
            "🔴 {} exited after {} unseen frames: dwell {:.2}s (color total {:.2}s)",
            color,
            track.frames_since_seen,
            dwell_ms / 1000.0,
            *total / 1000.0
        );

        let obs = CompletedObservation {
            color,
            derived_label: color.face_name(),
            entry_ms: track.entry_ms,
            last_seen_ms: track.last_seen_ms,
            dwell_ms,
            cumulative_dwell_ms: *total,
            exited_ms: now_ms,
        };
        self.completed.push(obs.clone());
        Some(obs)
    }

    pub fn get(&self, color: CubeColor) -> Option<&ActiveTrack> {
        self.tracks.get(&color)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &ActiveTrack> {
        self.tracks.values()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn cooldowns(&self) -> &CooldownTable {
        &self.cooldowns
    }

    /// Session-wide dwell per color.
    pub fn color_totals_ms(&self) -> &BTreeMap<CubeColor, f64> {
        &self.color_totals_ms
    }

    /// Session history of exits, including ones a group later rejects.
    pub fn completed(&self) -> &[CompletedObservation] {
        &self.completed
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOX: BoundingBox = [0.0, 0.0, 10.0, 10.0];

    fn promotion(color: CubeColor, entry_ms: f64, confirmed_ms: f64) -> Promotion {
        Promotion {
            color,
            entry_ms,
            confirmed_ms,
            frames: 6,
            bbox: BOX,
        }
    }

    fn registry(min_exit_frames: u32) -> TrackRegistry {
        TrackRegistry::new(RegistryConfig {
            min_exit_frames,
            cooldown_ms: 2000.0,
        })
    }

    /// Run `n` frames in which nothing is seen, starting at `start_ms`.
    fn unseen_frames(reg: &mut TrackRegistry, start_ms: f64, n: u32) -> Vec<CompletedObservation> {
        let mut out = Vec::new();
        for i in 0..n {
            let now = start_ms + i as f64 * 100.0;
            reg.begin_frame(now);
            out.extend(reg.end_frame(now));
        }
        out
    }

    #[test]
    fn test_exit_after_threshold_uses_last_seen() {
        let mut reg = registry(10);
        reg.activate(&promotion(CubeColor::Red, 1000.0, 1300.0));

        reg.begin_frame(2000.0);
        assert!(reg.mark_seen(CubeColor::Red, BOX, 2000.0));
        assert!(reg.end_frame(2000.0).is_empty());

        let exits = unseen_frames(&mut reg, 2100.0, 9);
        assert!(exits.is_empty(), "9 unseen frames must not exit");
        assert_eq!(reg.get(CubeColor::Red).unwrap().frames_since_seen, 9);

        let exits = unseen_frames(&mut reg, 3000.0, 1);
        assert_eq!(exits.len(), 1);
        let obs = &exits[0];
        assert_eq!(obs.color, CubeColor::Red);
        assert_eq!(obs.entry_ms, 1000.0);
        assert_eq!(obs.last_seen_ms, 2000.0);
        assert_eq!(obs.dwell_ms, 1000.0);
        assert_eq!(obs.derived_label, "Top");
        assert_eq!(obs.exited_ms, 3000.0);
        assert!(!reg.contains(CubeColor::Red));
    }

    #[test]
    fn test_redetection_cancels_exit_progress() {
        let mut reg = registry(3);
        reg.activate(&promotion(CubeColor::Blue, 0.0, 200.0));
        unseen_frames(&mut reg, 300.0, 2);
        assert_eq!(reg.get(CubeColor::Blue).unwrap().frames_since_seen, 2);

        reg.begin_frame(500.0);
        reg.mark_seen(CubeColor::Blue, BOX, 500.0);
        reg.end_frame(500.0);
        assert_eq!(reg.get(CubeColor::Blue).unwrap().frames_since_seen, 0);

        assert!(unseen_frames(&mut reg, 600.0, 2).is_empty());
        assert_eq!(unseen_frames(&mut reg, 800.0, 1).len(), 1);
    }

    #[test]
    fn test_exit_starts_cooldown() {
        let mut reg = registry(1);
        reg.activate(&promotion(CubeColor::Green, 0.0, 200.0));
        let exits = unseen_frames(&mut reg, 1000.0, 1);
        assert_eq!(exits.len(), 1);

        assert!(reg.in_cooldown(CubeColor::Green, 1000.0));
        assert!(reg.in_cooldown(CubeColor::Green, 2999.0));
        assert!(!reg.in_cooldown(CubeColor::Green, 3000.0));
        assert!(!reg.in_cooldown(CubeColor::Red, 1000.0));
        assert_eq!(reg.cooldowns().suppressed_until(CubeColor::Green), Some(3000.0));

        reg.begin_frame(3500.0);
        assert_eq!(reg.cooldowns().suppressed_until(CubeColor::Green), None);
    }

    #[test]
    fn test_cumulative_dwell_per_color() {
        let mut reg = registry(1);
        reg.activate(&promotion(CubeColor::White, 0.0, 2000.0));
        let first = unseen_frames(&mut reg, 2100.0, 1);
        assert_eq!(first[0].cumulative_dwell_ms, 2000.0);

        reg.activate(&promotion(CubeColor::White, 10_000.0, 13_000.0));
        let second = unseen_frames(&mut reg, 13_100.0, 1);
        assert_eq!(second[0].dwell_ms, 3000.0);
        assert_eq!(second[0].cumulative_dwell_ms, 5000.0);
        assert_eq!(reg.color_totals_ms()[&CubeColor::White], 5000.0);

        let history: Vec<f64> = reg.completed().iter().map(|o| o.dwell_ms).collect();
        assert_eq!(history, vec![2000.0, 3000.0]);
    }

    #[test]
    fn test_mark_seen_without_track() {
        let mut reg = registry(10);
        assert!(!reg.mark_seen(CubeColor::Orange, BOX, 0.0));
    }
}
