// src/main.rs
//
// Replays a recorded stream of classified frames (JSONL) through the
// tracking core. Control records in the same stream stand in for the
// operator's keyboard: force-finalize, dispatch toggle, profile switch,
// parameter tweaks.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cube_timing::analysis::{FramePipeline, GroupOutcome};
use cube_timing::dispatcher::GroupDispatcher;
use cube_timing::pipeline::{PipelineMetrics, TrackerEvent};
use cube_timing::session::{save_group_record, GroupRecord};
use cube_timing::types::{Config, FrameInput};
use serde::Deserialize;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cube-timing")]
#[command(about = "Confirm, group and time colored cubes from per-frame classifications")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a JSONL stream of frames and control records.
    Run {
        /// Input stream, one JSON record per line.
        #[arg(long)]
        input: PathBuf,

        /// YAML configuration; defaults are used if the file is missing.
        #[arg(long, default_value = "config.yaml")]
        config: PathBuf,

        /// Directory for the groups JSONL and the session report.
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,

        /// Never contact the outbound endpoint.
        #[arg(long)]
        no_dispatch: bool,
    },
    /// Load a configuration file and report inconsistencies.
    CheckConfig {
        #[arg(long, default_value = "config.yaml")]
        config: PathBuf,
    },
}

// ============================================================================
// INPUT RECORDS
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InputRecord {
    Frame(FrameInput),
    Control { action: ControlAction },
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
enum ControlAction {
    ForceFinalize,
    ToggleDispatch,
    SetDispatch(bool),
    ToggleFastMode,
    SetConfirmationMs(f64),
    SetConfirmationFrames(u32),
    SetMissedFrames(u32),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            config,
            output_dir,
            no_dispatch,
        } => {
            let (config, loaded) = load_config(&config)?;
            init_tracing(&config.logging.level);
            info!("🎲 Cube timing starting");
            if loaded {
                info!("✓ Configuration loaded");
            } else {
                warn!("⚠️  No config file, using defaults");
            }
            run(&input, &config, &output_dir, no_dispatch).await
        }
        Commands::CheckConfig { config: path } => {
            let config = Config::load(&path)?;
            init_tracing(&config.logging.level);
            let warnings = config.validate();
            if warnings.is_empty() {
                info!("✓ {} is consistent", path.display());
            } else {
                warn!("{} issue(s) in {}", warnings.len(), path.display());
            }
            Ok(())
        }
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

fn load_config(path: &Path) -> Result<(Config, bool)> {
    if path.exists() {
        Ok((Config::load(path)?, true))
    } else {
        Ok((Config::default(), false))
    }
}

async fn run(input: &Path, config: &Config, output_dir: &Path, no_dispatch: bool) -> Result<()> {
    config.validate();

    let det = &config.detection;
    info!(
        "Confirmation: normal {:.0}ms/{} frames, fast {:.0}ms/{} frames, max missed {}",
        det.min_detection_duration_ms,
        det.min_consecutive_frames,
        det.fast_detection_duration_ms,
        det.fast_detection_frames,
        det.max_missed_frames
    );
    info!(
        "Exit after {} unseen frames, cooldown {:.0}ms",
        det.min_exit_frames, det.cooldown_ms
    );

    let metrics = PipelineMetrics::new();
    let mut pipeline = FramePipeline::new(config, metrics.clone());
    if no_dispatch {
        info!("⚪ Dispatch disabled (--no-dispatch)");
    } else {
        let dispatcher = GroupDispatcher::new(&config.dispatch, metrics.clone())?;
        info!(
            "📡 Dispatch endpoint: {} ({})",
            dispatcher.endpoint_url(),
            if dispatcher.is_enabled() { "enabled" } else { "disabled" }
        );
        pipeline = pipeline.with_dispatcher(dispatcher);
    }

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("session");
    let groups_path = output_dir.join(format!("{}_groups.jsonl", stem));
    let mut groups_file = std::fs::File::create(&groups_path)
        .with_context(|| format!("Failed to create {}", groups_path.display()))?;
    info!("💾 Groups will be written to: {}", groups_path.display());

    let reader = BufReader::new(
        std::fs::File::open(input)
            .with_context(|| format!("Failed to open input {}", input.display()))?,
    );

    let mut skipped_lines = 0usize;
    let mut frames = 0u64;

    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read line {}", idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let record: InputRecord = match serde_json::from_str(trimmed) {
            Ok(r) => r,
            Err(e) => {
                warn!("⚠️  Line {}: {}", idx + 1, e);
                skipped_lines += 1;
                continue;
            }
        };

        let finalized = match record {
            InputRecord::Frame(frame) => {
                frames += 1;
                if frames % 500 == 0 {
                    info!(
                        "Progress: {} frames, {} active, {} pending, group {}",
                        frames,
                        pipeline.registry().len(),
                        pipeline.confirmation().len(),
                        pipeline.aggregator().group_number()
                    );
                }
                pipeline.process_frame(&frame).finalized
            }
            InputRecord::Control { action } => apply_control(&mut pipeline, action)
                .into_iter()
                .collect(),
        };

        for outcome in &finalized {
            save_outcome(outcome, &mut groups_file)?;
        }
        log_events(pipeline.drain_events());
    }

    // Shutdown flush of a partial group
    if let Some(outcome) = pipeline.force_finalize() {
        save_outcome(&outcome, &mut groups_file)?;
    }
    log_events(pipeline.drain_events());

    let in_flight = pipeline.take_in_flight();
    if !in_flight.is_empty() {
        info!("🌐 Waiting for {} in-flight dispatch(es)", in_flight.len());
    }
    for handle in in_flight {
        match handle.await {
            Ok(outcome) => debug!("🌐 Dispatch finished: {}", outcome.as_str()),
            Err(e) => warn!("⚠️  Dispatch task failed: {}", e),
        }
    }

    let report = pipeline.session_report();
    report.write_json(&output_dir.join(format!("{}_session.json", stem)))?;

    let summary = metrics.summary();
    info!("\n✓ Stream processed");
    info!("  Frames: {} ({} unreadable lines)", summary.total_frames, skipped_lines);
    info!(
        "  Observations: {} qualifying, {} rejected",
        summary.qualifying_observations, summary.rejected_observations
    );
    info!(
        "  Confirmed: {} | discarded pending: {} | exits: {}",
        summary.promotions, summary.discarded_pending, summary.exits
    );
    info!(
        "  Groups: {} ({:.1}s total) | duplicate colors dropped: {}",
        report.totals.groups,
        report.totals.total_duration_ms / 1000.0,
        summary.duplicate_drops
    );
    info!(
        "  Dispatch: {} delivered, {} failed, {} skipped",
        summary.dispatch_delivered, summary.dispatch_failed, summary.dispatch_skipped
    );
    for (color, total_ms) in &report.color_totals_ms {
        info!("  {:<7} {:.1}s", color.as_str(), total_ms / 1000.0);
    }
    info!(
        "  Events: {:?} ({} dropped undrained)",
        pipeline.event_counts(),
        pipeline.dropped_events()
    );

    Ok(())
}

fn apply_control(pipeline: &mut FramePipeline, action: ControlAction) -> Option<GroupOutcome> {
    info!("🎛️  Control: {:?}", action);
    match action {
        ControlAction::ForceFinalize => {
            let outcome = pipeline.force_finalize();
            if outcome.is_none() {
                info!("Current group is empty, nothing to finalize");
            }
            return outcome;
        }
        ControlAction::ToggleDispatch => {
            pipeline.toggle_dispatch();
        }
        ControlAction::SetDispatch(enabled) => pipeline.set_dispatch_enabled(enabled),
        ControlAction::ToggleFastMode => {
            pipeline.params_mut().toggle_fast_mode();
        }
        ControlAction::SetConfirmationMs(ms) => {
            pipeline.params_mut().set_confirmation_duration_ms(ms);
        }
        ControlAction::SetConfirmationFrames(n) => {
            pipeline.params_mut().set_confirmation_frames(n);
        }
        ControlAction::SetMissedFrames(n) => {
            pipeline.params_mut().set_max_missed_frames(n);
        }
    }
    None
}

fn save_outcome(outcome: &GroupOutcome, file: &mut std::fs::File) -> Result<()> {
    save_group_record(
        &GroupRecord {
            group: &outcome.group,
            timing: &outcome.report,
            dispatched: outcome.dispatched,
        },
        file,
    )
}

fn log_events(events: Vec<TrackerEvent>) {
    for event in events {
        match event {
            TrackerEvent::PendingDiscarded { color, reason, timestamp_ms } => debug!(
                "{} pending discarded at {:.0}ms ({})",
                color.as_str(),
                timestamp_ms,
                reason.as_str()
            ),
            TrackerEvent::DuplicateColorDropped { color, group_number } => debug!(
                "{} already in group {}, observation not grouped",
                color.as_str(),
                group_number
            ),
            other => debug!("Event: {}", other.kind()),
        }
    }
}
