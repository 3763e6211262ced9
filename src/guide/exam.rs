//! Exam Step Tracking
//!
//! Optional scoring layer over a guide: counts mistakes and rollbacks and
//! times each step while exam mode is on.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::registry::GuideStep;

/// Summary of an exam run over a guide
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExamSummary {
    pub total_steps: usize,
    pub completed_steps: usize,
    pub total_errors: u32,
    pub total_rollbacks: u32,
    /// Entries formatted as `step_id:reason`
    pub error_steps: Vec<String>,
    pub total_time_secs: f64,
}

#[derive(Debug, Default)]
pub struct ExamStepTracker {
    enabled: bool,
    error_count: u32,
    rollback_count: u32,
    error_steps: Vec<String>,
    started: HashMap<String, DateTime<Utc>>,
    completed: HashMap<String, DateTime<Utc>>,
}

impl ExamStepTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn rollback_count(&self) -> u32 {
        self.rollback_count
    }

    pub fn error_steps(&self) -> &[String] {
        &self.error_steps
    }

    /// Turn exam mode on and clear the previous run
    pub fn enable(&mut self) {
        self.enabled = true;
        self.reset();
        info!("Exam mode enabled");
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        info!(
            "Exam mode disabled: {} errors, {} rollbacks",
            self.error_count, self.rollback_count
        );
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.rollback_count = 0;
        self.error_steps.clear();
        self.started.clear();
        self.completed.clear();
    }

    pub fn record_error(&mut self, step_id: &str, reason: &str) {
        if !self.enabled {
            return;
        }
        self.error_count += 1;
        self.error_steps.push(format!("{}:{}", step_id, reason));
        info!(
            "Exam error at step '{}': {} (total {})",
            step_id, reason, self.error_count
        );
    }

    pub fn on_step_started(&mut self, step_id: &str, at: DateTime<Utc>) {
        if self.enabled {
            self.started.insert(step_id.to_string(), at);
        }
    }

    pub fn on_step_completed(&mut self, step_id: &str, at: DateTime<Utc>) {
        if self.enabled {
            self.completed.insert(step_id.to_string(), at);
        }
    }

    pub fn on_rollback(&mut self, from_step_id: &str) {
        if self.enabled {
            self.rollback_count += 1;
            info!("Exam rollback from step '{}'", from_step_id);
        }
    }

    /// Seconds between start and completion, 0 when either is missing
    pub fn step_duration_secs(&self, step_id: &str) -> f64 {
        match (self.started.get(step_id), self.completed.get(step_id)) {
            (Some(start), Some(end)) => (*end - *start).num_milliseconds() as f64 / 1000.0,
            _ => 0.0,
        }
    }

    pub fn summary(&self, steps: &[GuideStep]) -> ExamSummary {
        let total_time_secs = self
            .completed
            .keys()
            .map(|id| self.step_duration_secs(id))
            .sum();

        ExamSummary {
            total_steps: steps.len(),
            completed_steps: steps.iter().filter(|s| s.completed).count(),
            total_errors: self.error_count,
            total_rollbacks: self.rollback_count,
            error_steps: self.error_steps.clone(),
            total_time_secs,
        }
    }
}
