// src/analysis/mod.rs
//
// Cube tracking core.
//
// Signal flow:
//   Classified frame → confirmation (pending per color) ─→ track_registry (active per color)
//   track_registry exits → group_aggregator → timing_analyzer ─→ GroupOutcome
//                                           └→ dispatcher (spawned, fire-and-forget)
//
// Orchestrated by frame_pipeline::FramePipeline.

pub mod confirmation;
pub mod frame_pipeline;
pub mod group_aggregator;
pub mod timing_analyzer;
pub mod track_registry;

// Re-exports for ergonomic access from main.rs
pub use confirmation::{
    ConfirmationProfile, ConfirmationTracker, DiscardReason, PendingDetection, ProfileMode,
    Promotion,
};
pub use frame_pipeline::{FrameOutput, FramePipeline, GroupOutcome, RuntimeParams};
pub use group_aggregator::{AddOutcome, FinalizedGroup, GroupAggregator};
pub use timing_analyzer::{analyze_group, MemberTiming, TimingReport, TimingVerdict};
pub use track_registry::{ActiveTrack, CompletedObservation, CooldownTable, TrackRegistry};
