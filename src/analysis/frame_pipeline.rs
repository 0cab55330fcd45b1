// src/analysis/frame_pipeline.rs
//
// One pass per frame, in a fixed order:
//
//   registry.begin_frame
//     -> qualify each observation (confidence, known color, cooldown)
//     -> re-detection of an active track, or confirmation progress
//   confirmation.end_frame   (missed frames, 3 s ceiling)
//   registry.end_frame       (exit debounce, cooldown)
//     -> group aggregator -> timing analysis -> dispatch (spawned)
//
// The pipeline is the single writer of all tracker state. Dispatch tasks
// receive an owned payload and never call back into it.

use super::confirmation::{ConfirmationProfile, ConfirmationTracker, ObserveOutcome, ProfileMode};
use super::group_aggregator::{AddOutcome, FinalizedGroup, GroupAggregator};
use super::timing_analyzer::{analyze_group, TimingReport, TimingVerdict};
use super::track_registry::{CompletedObservation, RegistryConfig, TrackRegistry};
use crate::dispatcher::{DispatchOutcome, GroupDispatcher};
use crate::pipeline::{EventBus, PipelineMetrics, TrackerEvent};
use crate::session::SessionReport;
use crate::types::{ColorObservation, Config, CubeColor, DetectionConfig, FrameInput, TimingConfig};
use std::collections::{BTreeMap, HashSet};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_BUS_CAPACITY: usize = 256;

// ============================================================================
// RUNTIME PARAMETERS
// ============================================================================

pub const MIN_CONFIRMATION_MS: f64 = 100.0;
pub const MAX_CONFIRMATION_MS: f64 = 2000.0;
pub const MIN_MISSED_FRAMES: u32 = 1;
pub const MAX_MISSED_FRAMES: u32 = 10;

/// Parameters an external control surface may change between frames.
/// Duration and frame-count setters act on the normal profile.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeParams {
    normal: ConfirmationProfile,
    fast: ConfirmationProfile,
    mode: ProfileMode,
    max_missed_frames: u32,
}

impl RuntimeParams {
    pub fn from_config(config: &DetectionConfig) -> Self {
        Self {
            normal: ConfirmationProfile::new(
                config.min_detection_duration_ms,
                config.min_consecutive_frames,
            ),
            fast: ConfirmationProfile::new(
                config.fast_detection_duration_ms,
                config.fast_detection_frames,
            ),
            mode: if config.fast_mode {
                ProfileMode::Fast
            } else {
                ProfileMode::Normal
            },
            max_missed_frames: config.max_missed_frames,
        }
    }

    pub fn active_profile(&self) -> ConfirmationProfile {
        match self.mode {
            ProfileMode::Normal => self.normal,
            ProfileMode::Fast => self.fast,
        }
    }

    pub fn mode(&self) -> ProfileMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ProfileMode) {
        self.mode = mode;
        let p = self.active_profile();
        info!(
            "⚙️  Confirmation profile {} ({:.0}ms / {} frames)",
            mode.as_str(),
            p.required_duration_ms,
            p.required_frames
        );
    }

    pub fn toggle_fast_mode(&mut self) -> ProfileMode {
        let next = match self.mode {
            ProfileMode::Normal => ProfileMode::Fast,
            ProfileMode::Fast => ProfileMode::Normal,
        };
        self.set_mode(next);
        next
    }

    /// Returns the value actually applied.
    pub fn set_confirmation_duration_ms(&mut self, ms: f64) -> f64 {
        let ms = ms.clamp(MIN_CONFIRMATION_MS, MAX_CONFIRMATION_MS);
        self.normal.required_duration_ms = ms;
        info!("⚙️  Confirmation duration {:.0}ms", ms);
        ms
    }

    pub fn set_confirmation_frames(&mut self, frames: u32) -> u32 {
        let frames = frames.max(1);
        self.normal.required_frames = frames;
        info!("⚙️  Confirmation frames {}", frames);
        frames
    }

    pub fn set_max_missed_frames(&mut self, frames: u32) -> u32 {
        let frames = frames.clamp(MIN_MISSED_FRAMES, MAX_MISSED_FRAMES);
        self.max_missed_frames = frames;
        info!("⚙️  Missed-frame tolerance {}", frames);
        frames
    }

    pub fn max_missed_frames(&self) -> u32 {
        self.max_missed_frames
    }

    pub fn normal_profile(&self) -> ConfirmationProfile {
        self.normal
    }

    pub fn fast_profile(&self) -> ConfirmationProfile {
        self.fast
    }
}

// ============================================================================
// OUTPUT
// ============================================================================

#[derive(Debug, Clone)]
pub struct GroupOutcome {
    pub group: FinalizedGroup,
    pub report: TimingReport,
    /// Handed to a dispatch task
    pub dispatched: bool,
}

#[derive(Debug, Default, Clone)]
pub struct FrameOutput {
    pub entered: Vec<CubeColor>,
    pub exited: Vec<CompletedObservation>,
    pub finalized: Vec<GroupOutcome>,
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct FramePipeline {
    confidence_threshold: f32,
    timing: TimingConfig,
    params: RuntimeParams,
    confirmation: ConfirmationTracker,
    registry: TrackRegistry,
    aggregator: GroupAggregator,
    dispatcher: Option<GroupDispatcher>,
    in_flight: Vec<JoinHandle<DispatchOutcome>>,
    events: EventBus,
    metrics: PipelineMetrics,
    last_timestamp_ms: f64,
}

impl FramePipeline {
    pub fn new(config: &Config, metrics: PipelineMetrics) -> Self {
        let detection = &config.detection;
        Self {
            confidence_threshold: detection.confidence_threshold,
            timing: config.timing.clone(),
            params: RuntimeParams::from_config(detection),
            confirmation: ConfirmationTracker::new(),
            registry: TrackRegistry::new(RegistryConfig {
                min_exit_frames: detection.min_exit_frames,
                cooldown_ms: detection.cooldown_ms,
            }),
            aggregator: GroupAggregator::new(),
            dispatcher: None,
            in_flight: Vec::new(),
            events: EventBus::new(EVENT_BUS_CAPACITY),
            metrics,
            last_timestamp_ms: 0.0,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: GroupDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn process_frame(&mut self, frame: &FrameInput) -> FrameOutput {
        let now = frame.timestamp_ms;
        self.last_timestamp_ms = now;
        self.metrics.inc(&self.metrics.total_frames);

        self.registry.begin_frame(now);
        let profile = self.params.active_profile();
        let mut output = FrameOutput::default();
        let mut seen: HashSet<CubeColor> = HashSet::new();

        for obs in &frame.observations {
            if !self.qualifies(obs, now) {
                self.metrics.inc(&self.metrics.rejected_observations);
                continue;
            }
            // One observation per color per frame
            if !seen.insert(obs.color) {
                continue;
            }
            self.metrics.inc(&self.metrics.qualifying_observations);
            self.observe(obs, now, &profile, &mut output);
        }

        for d in self
            .confirmation
            .end_frame(&seen, now, self.params.max_missed_frames())
        {
            self.metrics.inc(&self.metrics.discarded_pending);
            self.events.publish(TrackerEvent::PendingDiscarded {
                color: d.color,
                reason: d.reason,
                timestamp_ms: now,
            });
        }

        for obs in self.registry.end_frame(now) {
            self.on_exit(obs, now, &mut output);
        }

        self.prune_in_flight();
        output
    }

    fn qualifies(&self, obs: &ColorObservation, now: f64) -> bool {
        if obs.confidence <= self.confidence_threshold || !obs.color.is_known() {
            return false;
        }
        if self.registry.in_cooldown(obs.color, now) {
            debug!("🧊 {} ignored, cooling down", obs.color);
            return false;
        }
        true
    }

    fn observe(
        &mut self,
        obs: &ColorObservation,
        now: f64,
        profile: &ConfirmationProfile,
        output: &mut FrameOutput,
    ) {
        if self.registry.mark_seen(obs.color, obs.bbox, now) {
            return;
        }

        match self.confirmation.observe(obs.color, obs.bbox, now, profile) {
            ObserveOutcome::Started => {
                self.events.publish(TrackerEvent::PendingStarted {
                    color: obs.color,
                    timestamp_ms: now,
                });
            }
            ObserveOutcome::Progress { .. } => {}
            ObserveOutcome::Promoted(promotion) => {
                self.registry.activate(&promotion);
                self.metrics.inc(&self.metrics.promotions);
                self.events.publish(TrackerEvent::Entered {
                    color: promotion.color,
                    entry_ms: promotion.entry_ms,
                    confirmed_ms: promotion.confirmed_ms,
                });
                output.entered.push(promotion.color);
            }
        }
    }

    fn on_exit(&mut self, obs: CompletedObservation, now: f64, output: &mut FrameOutput) {
        let color = obs.color;
        self.confirmation.discard(color);
        self.metrics.inc(&self.metrics.exits);
        self.events.publish(TrackerEvent::Exited(obs.clone()));
        output.exited.push(obs.clone());

        match self.aggregator.add(obs, now) {
            AddOutcome::Added { .. } => {}
            AddOutcome::Duplicate => {
                self.metrics.inc(&self.metrics.duplicate_drops);
                self.events.publish(TrackerEvent::DuplicateColorDropped {
                    color,
                    group_number: self.aggregator.group_number(),
                });
            }
            AddOutcome::Finalized(group) => {
                let outcome = self.on_group_finalized(group);
                output.finalized.push(outcome);
            }
        }
    }

    fn on_group_finalized(&mut self, group: FinalizedGroup) -> GroupOutcome {
        self.metrics.inc(&self.metrics.finalized_groups);

        let report = analyze_group(&group, &self.timing);
        log_timing_report(&report);

        let dispatched = self.dispatch(&group);
        self.events.publish(TrackerEvent::GroupFinalized {
            group: group.clone(),
            report: report.clone(),
        });

        GroupOutcome {
            group,
            report,
            dispatched,
        }
    }

    fn dispatch(&mut self, group: &FinalizedGroup) -> bool {
        let Some(dispatcher) = &self.dispatcher else {
            return false;
        };
        match dispatcher.dispatch(group) {
            Ok(handle) => {
                self.in_flight.push(handle);
                true
            }
            Err(_) => false,
        }
    }

    /// Finalize the current partial group (manual flush, shutdown).
    /// No-op when the current group is empty.
    pub fn force_finalize(&mut self) -> Option<GroupOutcome> {
        let group = self.aggregator.force_finalize(self.last_timestamp_ms)?;
        Some(self.on_group_finalized(group))
    }

    // ------------------------------------------------------------------------
    // Controls
    // ------------------------------------------------------------------------

    pub fn params(&self) -> &RuntimeParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut RuntimeParams {
        &mut self.params
    }

    pub fn dispatch_enabled(&self) -> bool {
        self.dispatcher.as_ref().is_some_and(|d| d.is_enabled())
    }

    pub fn set_dispatch_enabled(&mut self, enabled: bool) {
        match &self.dispatcher {
            Some(d) => d.set_enabled(enabled),
            None => warn!("⚠️  No dispatcher configured"),
        }
    }

    /// Returns the new state; false when no dispatcher is configured.
    pub fn toggle_dispatch(&mut self) -> bool {
        match &self.dispatcher {
            Some(d) => d.toggle(),
            None => {
                warn!("⚠️  No dispatcher configured");
                false
            }
        }
    }

    // ------------------------------------------------------------------------
    // In-flight dispatches
    // ------------------------------------------------------------------------

    fn prune_in_flight(&mut self) {
        self.in_flight.retain(|h| !h.is_finished());
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Hand over outstanding dispatch handles, e.g. to await them at shutdown.
    pub fn take_in_flight(&mut self) -> Vec<JoinHandle<DispatchOutcome>> {
        std::mem::take(&mut self.in_flight)
    }

    // ------------------------------------------------------------------------
    // Read-only views
    // ------------------------------------------------------------------------

    pub fn drain_events(&mut self) -> Vec<TrackerEvent> {
        self.events.drain()
    }

    pub fn event_counts(&self) -> &BTreeMap<&'static str, u64> {
        self.events.counts()
    }

    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn confirmation(&self) -> &ConfirmationTracker {
        &self.confirmation
    }

    pub fn registry(&self) -> &TrackRegistry {
        &self.registry
    }

    pub fn aggregator(&self) -> &GroupAggregator {
        &self.aggregator
    }

    pub fn session_report(&self) -> SessionReport {
        SessionReport::capture(
            &self.aggregator,
            &self.registry,
            &self.timing,
            self.metrics.summary(),
        )
    }
}

fn log_timing_report(report: &TimingReport) {
    let line = format!(
        "⏱️  Group {}: {:.2}s vs {:.2}s expected ({:+.2}s) {}",
        report.group_number,
        report.total_ms / 1000.0,
        report.expected_total_ms / 1000.0,
        report.total_deviation_ms / 1000.0,
        report.verdict.as_str()
    );
    if report.verdict == TimingVerdict::OnTime {
        info!("{}", line);
    } else {
        warn!("{}", line);
    }

    for m in &report.members {
        debug!(
            "   {} {:.2}s ({:+.2}s) {}",
            m.color,
            m.dwell_ms / 1000.0,
            m.deviation_ms / 1000.0,
            m.verdict.as_str()
        );
    }
    for m in report.contributors() {
        info!(
            "   ↳ {} contributed ({:+.2}s)",
            m.color,
            m.deviation_ms / 1000.0
        );
    }
}
