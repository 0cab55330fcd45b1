// src/analysis/confirmation.rs
//
// Per-color debounce between raw classifications and confirmed objects.
//
// A color that starts qualifying becomes a PendingDetection. It is
// promoted once it has kept qualifying for both a minimum number of
// frames and a minimum elapsed time. Two independent survival clocks
// guard the pending state:
//   - missed frames: motion blur / occlusion may drop a few frames, but
//     more than `max_missed_frames` in a row resets the detection
//   - absolute age: a color that keeps barely qualifying without ever
//     reaching the frame requirement is dropped after 3 s
//
// The active profile (normal / fast) is passed in on every call so a
// profile switch takes effect deterministically at the next frame.

use crate::types::{BoundingBox, CubeColor};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// Unconfirmed detections older than this are discarded regardless of
/// their missed-frame count.
pub const UNCONFIRMED_CEILING_MS: f64 = 3000.0;

// ============================================================================
// PROFILES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfirmationProfile {
    /// Minimum time from first sighting to promotion
    pub required_duration_ms: f64,
    /// Minimum qualifying frames before promotion
    pub required_frames: u32,
}

impl ConfirmationProfile {
    pub fn new(required_duration_ms: f64, required_frames: u32) -> Self {
        Self {
            required_duration_ms,
            required_frames,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileMode {
    Normal,
    Fast,
}

impl ProfileMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Fast => "FAST",
        }
    }
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PendingDetection {
    pub color: CubeColor,
    pub first_seen_ms: f64,
    /// Frames since first sighting in which the color qualified
    pub consecutive_frames: u32,
    /// Frames since the last qualifying observation
    pub missed_frames: u32,
    pub last_bbox: BoundingBox,
}

impl PendingDetection {
    fn new(color: CubeColor, bbox: BoundingBox, now_ms: f64) -> Self {
        Self {
            color,
            first_seen_ms: now_ms,
            consecutive_frames: 1,
            missed_frames: 0,
            last_bbox: bbox,
        }
    }

    pub fn age_ms(&self, now_ms: f64) -> f64 {
        now_ms - self.first_seen_ms
    }
}

/// A pending detection that met its profile. `entry_ms` is the first
/// sighting, not the promotion instant, so dwell includes confirmation
/// latency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Promotion {
    pub color: CubeColor,
    pub entry_ms: f64,
    pub confirmed_ms: f64,
    pub frames: u32,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObserveOutcome {
    Started,
    Progress { consecutive_frames: u32, elapsed_ms: f64 },
    Promoted(Promotion),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiscardReason {
    /// More than `max_missed_frames` consecutive frames without the color
    MissedFrames,
    /// Older than the unconfirmed ceiling
    Expired,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissedFrames => "MISSED_FRAMES",
            Self::Expired => "EXPIRED",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Discarded {
    pub color: CubeColor,
    pub reason: DiscardReason,
    pub first_seen_ms: f64,
    pub consecutive_frames: u32,
}

// ============================================================================
// TRACKER
// ============================================================================

#[derive(Debug, Default)]
pub struct ConfirmationTracker {
    pending: BTreeMap<CubeColor, PendingDetection>,
}

impl ConfirmationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one qualifying observation of a color that has no active track.
    /// Call at most once per color per frame.
    pub fn observe(
        &mut self,
        color: CubeColor,
        bbox: BoundingBox,
        now_ms: f64,
        profile: &ConfirmationProfile,
    ) -> ObserveOutcome {
        let Some(pending) = self.pending.get_mut(&color) else {
            debug!("🔍 Pending {} started at {:.0}ms", color, now_ms);
            self.pending
                .insert(color, PendingDetection::new(color, bbox, now_ms));
            return ObserveOutcome::Started;
        };

        pending.missed_frames = 0;
        pending.consecutive_frames += 1;
        pending.last_bbox = bbox;

        let elapsed_ms = pending.age_ms(now_ms);
        if elapsed_ms >= profile.required_duration_ms
            && pending.consecutive_frames >= profile.required_frames
        {
            let promotion = Promotion {
                color,
                entry_ms: pending.first_seen_ms,
                confirmed_ms: now_ms,
                frames: pending.consecutive_frames,
                bbox,
            };
            self.pending.remove(&color);
            info!(
                "✅ {} confirmed after {:.0}ms / {} frames",
                color, elapsed_ms, promotion.frames
            );
            return ObserveOutcome::Promoted(promotion);
        }

        debug!(
            "⏳ {}: {}/{} frames, {:.0}/{:.0}ms",
            color,
            pending.consecutive_frames,
            profile.required_frames,
            elapsed_ms,
            profile.required_duration_ms
        );
        ObserveOutcome::Progress {
            consecutive_frames: pending.consecutive_frames,
            elapsed_ms,
        }
    }

    /// End-of-frame maintenance. `seen` holds every color that qualified
    /// this frame (pending or not).
    pub fn end_frame(
        &mut self,
        seen: &HashSet<CubeColor>,
        now_ms: f64,
        max_missed_frames: u32,
    ) -> Vec<Discarded> {
        let mut discarded = Vec::new();

        for (color, pending) in self.pending.iter_mut() {
            let reason = if pending.age_ms(now_ms) > UNCONFIRMED_CEILING_MS {
                Some(DiscardReason::Expired)
            } else if !seen.contains(color) {
                pending.missed_frames += 1;
                if pending.missed_frames > max_missed_frames {
                    Some(DiscardReason::MissedFrames)
                } else {
                    debug!(
                        "⚠️  {}: {}/{} missed frames",
                        color, pending.missed_frames, max_missed_frames
                    );
                    None
                }
            } else {
                None
            };

            if let Some(reason) = reason {
                discarded.push(Discarded {
                    color: *color,
                    reason,
                    first_seen_ms: pending.first_seen_ms,
                    consecutive_frames: pending.consecutive_frames,
                });
            }
        }

        for d in &discarded {
            self.pending.remove(&d.color);
            debug!(
                "🔄 Pending {} discarded ({}) after {} frames",
                d.color,
                d.reason.as_str(),
                d.consecutive_frames
            );
        }
        discarded
    }

    /// Drop any pending state for `color`.
    pub fn discard(&mut self, color: CubeColor) -> Option<PendingDetection> {
        self.pending.remove(&color)
    }

    pub fn get(&self, color: CubeColor) -> Option<&PendingDetection> {
        self.pending.get(&color)
    }

    pub fn contains(&self, color: CubeColor) -> bool {
        self.pending.contains_key(&color)
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingDetection> {
        self.pending.values()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
