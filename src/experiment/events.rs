//! Experiment Event Types
//!
//! Events raised by an experiment controller to whoever subscribed.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExperimentEvent {
    /// A tracked guide-step condition changed
    GuideStepStatusChanged {
        step_id: String,
        completed: bool,
    },

    /// The simulation started or stopped
    StateChanged {
        running: bool,
    },

    /// The simulation reached its end state
    Completed,

    /// Tracking was switched on or off
    TrackingChanged {
        active: bool,
    },
}

impl ExperimentEvent {
    /// Get event type as string (for logging/debugging)
    pub fn event_type(&self) -> &'static str {
        match self {
            ExperimentEvent::GuideStepStatusChanged { .. } => "guide_step_status_changed",
            ExperimentEvent::StateChanged { .. } => "state_changed",
            ExperimentEvent::Completed => "completed",
            ExperimentEvent::TrackingChanged { .. } => "tracking_changed",
        }
    }
}
