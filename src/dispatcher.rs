// src/dispatcher.rs
//
// Fire-and-forget delivery of finalized groups to the external endpoint.
//
// Validation runs synchronously on the frame loop; the HTTP request runs
// on its own tokio task with a 2 s timeout. One attempt per group, no
// retry. A dispatch task owns an immutable payload built at finalization
// and reports only through the log and the shared metrics counters.

use crate::analysis::group_aggregator::FinalizedGroup;
use crate::pipeline::PipelineMetrics;
use crate::types::{DispatchConfig, GROUP_SIZE};
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DISPATCH_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// ERRORS / OUTCOMES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidGroup {
    #[error("group has {count} members, expected 3")]
    WrongMemberCount { count: usize },

    #[error("member {index} has no color")]
    MissingColor { index: usize },

    #[error("member {index} ({color}) has no derived label")]
    MissingLabel { index: usize, color: String },

    #[error("member {index} ({color}) has non-positive dwell {dwell_ms:.0}ms")]
    NonPositiveDwell {
        index: usize,
        color: String,
        dwell_ms: f64,
    },
}

/// Why a group was not handed to a dispatch task.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchSkipped {
    #[error("dispatch disabled")]
    Disabled,

    #[error("invalid group: {0}")]
    Invalid(#[from] InvalidGroup),

    #[error("no tokio runtime available")]
    NoRuntime,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Delivered,
    /// Endpoint answered with something other than the success status
    Rejected { status: u16 },
    TimedOut,
    ConnectionFailed,
    Failed { reason: String },
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "DELIVERED",
            Self::Rejected { .. } => "REJECTED",
            Self::TimedOut => "TIMED_OUT",
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::Failed { .. } => "FAILED",
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

// ============================================================================
// PAYLOAD
// ============================================================================

/// Durations in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPayload {
    pub total_duration: f64,
    pub members: Vec<MemberPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberPayload {
    pub color_label: String,
    pub derived_name: String,
    pub dwell_duration: f64,
}

impl GroupPayload {
    pub fn from_group(group: &FinalizedGroup) -> Self {
        Self {
            total_duration: group.total_duration_ms / 1000.0,
            members: group
                .members
                .iter()
                .map(|m| MemberPayload {
                    color_label: m.color.as_str().to_uppercase(),
                    derived_name: m.derived_label.to_string(),
                    dwell_duration: m.dwell_ms / 1000.0,
                })
                .collect(),
        }
    }
}

pub fn validate_group(group: &FinalizedGroup) -> Result<(), InvalidGroup> {
    if group.members.len() != GROUP_SIZE {
        return Err(InvalidGroup::WrongMemberCount {
            count: group.members.len(),
        });
    }

    for (index, member) in group.members.iter().enumerate() {
        if !member.color.is_known() {
            return Err(InvalidGroup::MissingColor { index });
        }
        if member.derived_label.is_empty() {
            return Err(InvalidGroup::MissingLabel {
                index,
                color: member.color.to_string(),
            });
        }
        if member.dwell_ms <= 0.0 {
            return Err(InvalidGroup::NonPositiveDwell {
                index,
                color: member.color.to_string(),
                dwell_ms: member.dwell_ms,
            });
        }
    }
    Ok(())
}

// ============================================================================
// DISPATCHER
// ============================================================================

/// Cheap to clone; clones share the enabled switch and the metrics.
#[derive(Clone)]
pub struct GroupDispatcher {
    http_client: reqwest::Client,
    endpoint_url: String,
    success_status: u16,
    timeout: Duration,
    enabled: Arc<AtomicBool>,
    metrics: PipelineMetrics,
}

impl GroupDispatcher {
    pub fn new(config: &DispatchConfig, metrics: PipelineMetrics) -> Result<Self> {
        Self::with_timeout(config, metrics, DISPATCH_TIMEOUT)
    }

    pub fn with_timeout(
        config: &DispatchConfig,
        metrics: PipelineMetrics,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            endpoint_url: config.endpoint_url.clone(),
            success_status: config.success_status,
            timeout,
            enabled: Arc::new(AtomicBool::new(config.enabled)),
            metrics,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        info!(
            "🌐 Dispatch {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    /// Flip the switch; returns the new state.
    pub fn toggle(&self) -> bool {
        let enabled = !self.enabled.fetch_xor(true, Ordering::Relaxed);
        info!(
            "🌐 Dispatch {}",
            if enabled { "enabled" } else { "disabled" }
        );
        enabled
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Validate and hand the group to a background task. Never blocks.
    pub fn dispatch(
        &self,
        group: &FinalizedGroup,
    ) -> Result<JoinHandle<DispatchOutcome>, DispatchSkipped> {
        if !self.is_enabled() {
            debug!("🌐 Dispatch disabled, group {} not sent", group.group_number);
            self.metrics.inc(&self.metrics.dispatch_skipped);
            return Err(DispatchSkipped::Disabled);
        }

        if let Err(e) = validate_group(group) {
            error!("❌ Group {} not dispatched: {}", group.group_number, e);
            self.metrics.inc(&self.metrics.dispatch_skipped);
            return Err(e.into());
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!(
                    "❌ Group {} not dispatched, no runtime: {}",
                    group.group_number, e
                );
                self.metrics.inc(&self.metrics.dispatch_skipped);
                return Err(DispatchSkipped::NoRuntime);
            }
        };

        let payload = GroupPayload::from_group(group);
        let group_number = group.group_number;
        let sender = self.clone();
        Ok(runtime.spawn(async move { sender.send(group_number, &payload).await }))
    }

    /// Single delivery attempt.
    pub async fn send(&self, group_number: u32, payload: &GroupPayload) -> DispatchOutcome {
        info!(
            "🌐 Sending group {} ({:.2}s) to {}",
            group_number, payload.total_duration, self.endpoint_url
        );

        let outcome = match self
            .http_client
            .post(&self.endpoint_url)
            .json(payload)
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status().as_u16();
                if status == self.success_status {
                    info!("✅ Group {} delivered", group_number);
                    DispatchOutcome::Delivered
                } else {
                    warn!(
                        "🌐 Endpoint rejected group {} with {}: {}",
                        group_number,
                        status,
                        response
                            .text()
                            .await
                            .unwrap_or_else(|_| "<no body>".to_string()),
                    );
                    DispatchOutcome::Rejected { status }
                }
            }
            Err(e) if e.is_timeout() => {
                warn!(
                    "🌐 Group {} timed out after {:?}",
                    group_number, self.timeout
                );
                DispatchOutcome::TimedOut
            }
            Err(e) if e.is_connect() => {
                error!("❌ Group {}: connection failed: {}", group_number, e);
                DispatchOutcome::ConnectionFailed
            }
            Err(e) => {
                error!("❌ Group {}: request failed: {}", group_number, e);
                DispatchOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        if outcome.is_delivered() {
            self.metrics.inc(&self.metrics.dispatch_delivered);
        } else {
            self.metrics.inc(&self.metrics.dispatch_failed);
        }
        outcome
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::one_shot_server;
    use super::*;
    use crate::analysis::track_registry::CompletedObservation;
    use crate::types::CubeColor;
    use chrono::Utc;
    use tokio::net::TcpListener;

    fn member(color: CubeColor, dwell_ms: f64) -> CompletedObservation {
        CompletedObservation {
            color,
            derived_label: color.face_name(),
            entry_ms: 0.0,
            last_seen_ms: dwell_ms,
            dwell_ms,
            cumulative_dwell_ms: dwell_ms,
            exited_ms: dwell_ms,
        }
    }

    fn group(members: Vec<CompletedObservation>) -> FinalizedGroup {
        let total_duration_ms = members.iter().map(|m| m.dwell_ms).sum();
        FinalizedGroup {
            group_number: 1,
            members,
            total_duration_ms,
            finalized_at_ms: 0.0,
            finalized_at: Utc::now(),
            forced: false,
        }
    }

    fn full_group() -> FinalizedGroup {
        group(vec![
            member(CubeColor::Red, 4000.0),
            member(CubeColor::Blue, 5500.0),
            member(CubeColor::Green, 6500.0),
        ])
    }

    fn dispatcher(url: String) -> GroupDispatcher {
        let config = DispatchConfig {
            enabled: true,
            endpoint_url: url,
            success_status: 201,
        };
        GroupDispatcher::new(&config, PipelineMetrics::new()).unwrap()
    }

    #[test]
    fn test_payload_shape() {
        let payload = GroupPayload::from_group(&full_group());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["totalDuration"], 16.0);
        assert_eq!(json["members"][0]["colorLabel"], "RED");
        assert_eq!(json["members"][0]["derivedName"], "Top");
        assert_eq!(json["members"][1]["dwellDuration"], 5.5);
        assert_eq!(json["members"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_validate_rejects_partial_group() {
        let g = group(vec![member(CubeColor::Red, 1000.0)]);
        assert_eq!(
            validate_group(&g),
            Err(InvalidGroup::WrongMemberCount { count: 1 })
        );
    }

    #[test]
    fn test_validate_rejects_bad_members() {
        let g = group(vec![
            member(CubeColor::Red, 1000.0),
            member(CubeColor::Blue, 0.0),
            member(CubeColor::Green, 1000.0),
        ]);
        assert!(matches!(
            validate_group(&g),
            Err(InvalidGroup::NonPositiveDwell { index: 1, .. })
        ));

        let g = group(vec![
            member(CubeColor::Red, 1000.0),
            member(CubeColor::Unknown, 1000.0),
            member(CubeColor::Green, 1000.0),
        ]);
        assert_eq!(
            validate_group(&g),
            Err(InvalidGroup::MissingColor { index: 1 })
        );

        let mut unlabeled = member(CubeColor::Green, 1000.0);
        unlabeled.derived_label = "";
        let g = group(vec![
            member(CubeColor::Red, 1000.0),
            member(CubeColor::Blue, 1000.0),
            unlabeled,
        ]);
        assert!(matches!(
            validate_group(&g),
            Err(InvalidGroup::MissingLabel { index: 2, .. })
        ));

        assert_eq!(validate_group(&full_group()), Ok(()));
    }

    #[test]
    fn test_disabled_dispatch_is_skipped() {
        let d = dispatcher("http://127.0.0.1:9/api/groups".to_string());
        assert!(!d.toggle());
        assert!(!d.is_enabled());
        assert_eq!(
            d.dispatch(&full_group()).unwrap_err(),
            DispatchSkipped::Disabled
        );
        assert_eq!(d.metrics.summary().dispatch_skipped, 1);

        // Clones share the switch
        let clone = d.clone();
        clone.set_enabled(true);
        assert!(d.is_enabled());
    }

    #[test]
    fn test_no_runtime_is_skipped() {
        let d = dispatcher("http://127.0.0.1:9/api/groups".to_string());
        assert_eq!(
            d.dispatch(&full_group()).unwrap_err(),
            DispatchSkipped::NoRuntime
        );
    }

    #[tokio::test]
    async fn test_invalid_group_is_not_sent() {
        let d = dispatcher("http://127.0.0.1:9/api/groups".to_string());
        let partial = group(vec![member(CubeColor::Red, 1000.0)]);
        assert!(matches!(
            d.dispatch(&partial),
            Err(DispatchSkipped::Invalid(InvalidGroup::WrongMemberCount { count: 1 }))
        ));
        let summary = d.metrics.summary();
        assert_eq!(summary.dispatch_skipped, 1);
        assert_eq!(summary.dispatch_failed, 0);
    }

    #[tokio::test]
    async fn test_delivered_on_success_status() {
        let (url, body_rx) = one_shot_server("201 Created").await;
        let d = dispatcher(url);

        let outcome = d.dispatch(&full_group()).unwrap().await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Delivered);
        assert_eq!(d.metrics.summary().dispatch_delivered, 1);

        let body: serde_json::Value = serde_json::from_str(&body_rx.await.unwrap()).unwrap();
        assert_eq!(body["totalDuration"], 16.0);
        assert_eq!(body["members"][2]["colorLabel"], "GREEN");
    }

    #[tokio::test]
    async fn test_other_status_is_rejected() {
        // 200 is a success code, but not the one the endpoint promises
        let (url, _body_rx) = one_shot_server("200 OK").await;
        let d = dispatcher(url);

        let outcome = d.dispatch(&full_group()).unwrap().await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Rejected { status: 200 });
        assert_eq!(d.metrics.summary().dispatch_failed, 1);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let d = dispatcher(format!("http://{}/api/groups", addr));
        let outcome = d.dispatch(&full_group()).unwrap().await.unwrap();
        assert_eq!(outcome, DispatchOutcome::ConnectionFailed);
    }

    #[tokio::test]
    async fn test_silent_endpoint_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/groups", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let config = DispatchConfig {
            enabled: true,
            endpoint_url: url,
            success_status: 201,
        };
        let d = GroupDispatcher::with_timeout(
            &config,
            PipelineMetrics::new(),
            Duration::from_millis(200),
        )
        .unwrap();
        let payload = GroupPayload::from_group(&full_group());
        assert_eq!(d.send(1, &payload).await, DispatchOutcome::TimedOut);
    }
}
