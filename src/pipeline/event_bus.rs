// src/pipeline/event_bus.rs
//
// Lifecycle events published by the frame pipeline. Consumers (the
// binary, a UI, tests) drain the bus instead of reaching into tracker
// state.

use crate::analysis::confirmation::DiscardReason;
use crate::analysis::group_aggregator::FinalizedGroup;
use crate::analysis::timing_analyzer::TimingReport;
use crate::analysis::track_registry::CompletedObservation;
use crate::types::CubeColor;
use std::collections::{BTreeMap, VecDeque};
use tracing::warn;

#[derive(Debug, Clone)]
pub enum TrackerEvent {
    PendingStarted {
        color: CubeColor,
        timestamp_ms: f64,
    },

    PendingDiscarded {
        color: CubeColor,
        reason: DiscardReason,
        timestamp_ms: f64,
    },

    Entered {
        color: CubeColor,
        entry_ms: f64,
        confirmed_ms: f64,
    },

    Exited(CompletedObservation),

    /// Completed observation whose color was already in the current group
    DuplicateColorDropped {
        color: CubeColor,
        group_number: u32,
    },

    GroupFinalized {
        group: FinalizedGroup,
        report: TimingReport,
    },
}

impl TrackerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PendingStarted { .. } => "pending_started",
            Self::PendingDiscarded { .. } => "pending_discarded",
            Self::Entered { .. } => "entered",
            Self::Exited(_) => "exited",
            Self::DuplicateColorDropped { .. } => "duplicate_color_dropped",
            Self::GroupFinalized { .. } => "group_finalized",
        }
    }
}

/// Bounded lifecycle queue. Keeps running per-kind totals that survive
/// draining, so a consumer that drains only occasionally still sees how many
/// events of each kind the session produced and how many it lost.
pub struct EventBus {
    events: VecDeque<TrackerEvent>,
    capacity: usize,
    published: BTreeMap<&'static str, u64>,
    dropped: u64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            published: BTreeMap::new(),
            dropped: 0,
        }
    }

    pub fn publish(&mut self, event: TrackerEvent) {
        *self.published.entry(event.kind()).or_insert(0) += 1;

        if self.events.len() >= self.capacity {
            if let Some(lost) = self.events.pop_front() {
                self.dropped += 1;
                warn!(
                    "Tracker event queue full ({}), dropped undrained {} event",
                    self.capacity,
                    lost.kind()
                );
            }
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<TrackerEvent> {
        self.events.drain(..).collect()
    }

    /// Events published this session, by kind, drained or not
    pub fn counts(&self) -> &BTreeMap<&'static str, u64> {
        &self.published
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(ts: f64) -> TrackerEvent {
        TrackerEvent::PendingStarted {
            color: CubeColor::Red,
            timestamp_ms: ts,
        }
    }

    #[test]
    fn test_drain_preserves_order() {
        let mut bus = EventBus::new(8);
        bus.publish(started(1.0));
        bus.publish(TrackerEvent::Entered {
            color: CubeColor::Red,
            entry_ms: 1.0,
            confirmed_ms: 2.0,
        });
        let events = bus.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind(), "pending_started");
        assert_eq!(events[1].kind(), "entered");
        assert!(bus.drain().is_empty());
    }

    #[test]
    fn test_full_bus_drops_oldest() {
        let mut bus = EventBus::new(2);
        bus.publish(started(1.0));
        bus.publish(started(2.0));
        bus.publish(started(3.0));
        assert_eq!(bus.dropped(), 1);

        let events = bus.drain();
        assert_eq!(events.len(), 2);
        let TrackerEvent::PendingStarted { timestamp_ms, .. } = &events[0] else {
            panic!("unexpected event");
        };
        assert_eq!(*timestamp_ms, 2.0);
    }

    #[test]
    fn test_counts_survive_drain_and_overflow() {
        let mut bus = EventBus::new(1);
        bus.publish(started(1.0));
        bus.publish(started(2.0));
        bus.drain();
        bus.publish(TrackerEvent::DuplicateColorDropped {
            color: CubeColor::Red,
            group_number: 1,
        });

        assert_eq!(bus.counts()["pending_started"], 2);
        assert_eq!(bus.counts()["duplicate_color_dropped"], 1);
        assert!(!bus.counts().contains_key("entered"));
        assert_eq!(bus.dropped(), 1);
    }
}
