//! Experiment Controller
//!
//! Stands in for one lab simulation. Quest steps ask it to track guide-step
//! ids and subscribe to its event channel; the controller raises an event
//! whenever a tracked condition changes.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tokio::sync::broadcast;
use tracing::{debug, info};

use super::events::ExperimentEvent;
use crate::guide::GuideRegistry;

pub const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct ExperimentController {
    name: String,
    running: bool,
    set_up: bool,
    tracking_active: bool,
    /// Guide-step ids the current subscribers care about, with how many
    /// active steps hold each one
    tracked: BTreeMap<String, usize>,
    /// Conditions reported directly by the simulation
    reported: HashMap<String, bool>,
    /// Last status raised per tracked id
    last_emitted: HashMap<String, bool>,
    events: broadcast::Sender<ExperimentEvent>,
}

impl ExperimentController {
    pub fn new(name: &str) -> Self {
        Self::with_capacity(name, DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(name: &str, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            name: name.to_string(),
            running: false,
            set_up: false,
            tracking_active: false,
            tracked: BTreeMap::new(),
            reported: HashMap::new(),
            last_emitted: HashMap::new(),
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExperimentEvent> {
        self.events.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn emit(&self, event: ExperimentEvent) {
        debug!("Experiment '{}' raised {}", self.name, event.event_type());
        // No subscribers is fine, nobody is waiting on this experiment
        let _ = self.events.send(event);
    }

    // ------------------------------------------------------------------
    // Simulation lifecycle
    // ------------------------------------------------------------------

    pub fn setup(&mut self) {
        self.set_up = true;
        info!("Set up experiment: {}", self.name);
    }

    pub fn is_set_up(&self) -> bool {
        self.set_up
    }

    pub fn start(&mut self) {
        self.running = true;
        info!("Started experiment: {}", self.name);
        self.emit(ExperimentEvent::StateChanged { running: true });
    }

    pub fn stop(&mut self) {
        self.running = false;
        info!("Stopped experiment: {}", self.name);
        self.emit(ExperimentEvent::StateChanged { running: false });
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn notify_completed(&self) {
        info!("Experiment '{}' completed", self.name);
        self.emit(ExperimentEvent::Completed);
    }

    // ------------------------------------------------------------------
    // Guide-step tracking
    // ------------------------------------------------------------------

    /// Start tracking one or many guide-step ids. Empty ids are skipped.
    pub fn start_tracking<I, S>(&mut self, step_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let before = self.tracked.len();
        for id in unique_ids(step_ids) {
            *self.tracked.entry(id).or_insert(0) += 1;
        }

        if self.tracked.is_empty() {
            return;
        }

        if !self.tracking_active {
            self.tracking_active = true;
            info!(
                "Experiment '{}' started tracking {} guide steps",
                self.name,
                self.tracked.len()
            );
            self.emit(ExperimentEvent::TrackingChanged { active: true });
        } else if self.tracked.len() != before {
            debug!(
                "Experiment '{}' now tracking {} guide steps",
                self.name,
                self.tracked.len()
            );
        }
    }

    /// Stop tracking one id, whoever holds it
    pub fn stop_tracking(&mut self, step_id: &str) {
        self.forget(step_id);
        if self.tracked.is_empty() {
            self.stop_all_tracking();
        }
    }

    /// Give back ids taken by one `start_tracking` call. An id stays tracked
    /// while another holder still needs it.
    pub fn release_tracking<I, S>(&mut self, step_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in unique_ids(step_ids) {
            match self.tracked.get(&id).copied() {
                Some(holders) if holders > 1 => {
                    self.tracked.insert(id, holders - 1);
                }
                Some(_) => self.forget(&id),
                None => {}
            }
        }

        if self.tracked.is_empty() {
            self.stop_all_tracking();
        } else {
            debug!(
                "Experiment '{}' still tracking {} guide steps",
                self.name,
                self.tracked.len()
            );
        }
    }

    fn forget(&mut self, step_id: &str) {
        self.tracked.remove(step_id);
        self.last_emitted.remove(step_id);
        self.reported.remove(step_id);
    }

    /// Drop every tracked id. Safe to call repeatedly.
    pub fn stop_all_tracking(&mut self) {
        if !self.tracking_active && self.tracked.is_empty() {
            return;
        }

        self.tracking_active = false;
        self.tracked.clear();
        self.reported.clear();
        self.last_emitted.clear();

        info!("Experiment '{}' stopped all tracking", self.name);
        self.emit(ExperimentEvent::TrackingChanged { active: false });
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking_active
    }

    pub fn is_tracked(&self, step_id: &str) -> bool {
        self.tracked.contains_key(step_id)
    }

    pub fn tracked_ids(&self) -> impl Iterator<Item = &String> {
        self.tracked.keys()
    }

    /// Simulation reports a condition. Ignored unless the id is tracked.
    pub fn report_condition(&mut self, step_id: &str, completed: bool) -> bool {
        if !self.tracked.contains_key(step_id) {
            debug!(
                "Experiment '{}' ignored report for untracked step '{}'",
                self.name, step_id
            );
            return false;
        }

        self.reported.insert(step_id.to_string(), completed);
        self.last_emitted.insert(step_id.to_string(), completed);
        self.emit(ExperimentEvent::GuideStepStatusChanged {
            step_id: step_id.to_string(),
            completed,
        });
        true
    }

    /// Combined status: reported by the simulation or completed in the guide
    pub fn condition(&self, step_id: &str, guides: &GuideRegistry) -> bool {
        self.reported.get(step_id).copied().unwrap_or(false) || guides.is_step_completed(step_id)
    }

    /// One tracking tick. Raises an event for every tracked id whose status
    /// differs from the last one raised; returns how many were raised.
    pub fn poll_tracking(&mut self, guides: &GuideRegistry) -> usize {
        if !self.tracking_active {
            return 0;
        }

        let mut changed = Vec::new();
        for id in self.tracked.keys() {
            let status = self.condition(id, guides);
            if self.last_emitted.get(id) != Some(&status) {
                changed.push((id.clone(), status));
            }
        }

        for (id, status) in &changed {
            self.last_emitted.insert(id.clone(), *status);
            self.emit(ExperimentEvent::GuideStepStatusChanged {
                step_id: id.clone(),
                completed: *status,
            });
        }

        changed.len()
    }

    pub fn tracking_info(&self, guides: &GuideRegistry) -> String {
        if !self.tracking_active {
            return "Tracking: Inactive".to_string();
        }

        let done = self
            .tracked
            .keys()
            .filter(|id| self.condition(id, guides))
            .count();
        format!("Tracking: {}/{} steps completed", done, self.tracked.len())
    }
}

/// Trimmed, non-empty ids, each once
fn unique_ids<I, S>(step_ids: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    step_ids
        .into_iter()
        .map(|id| id.as_ref().trim().to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

impl Drop for ExperimentController {
    fn drop(&mut self) {
        self.stop_all_tracking();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guide::GuideDef;

    fn drain(rx: &mut broadcast::Receiver<ExperimentEvent>) -> Vec<ExperimentEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_state_events() {
        let mut controller = ExperimentController::new("calorimeter");
        let mut rx = controller.subscribe();

        controller.start();
        assert!(controller.is_running());
        controller.stop();
        controller.notify_completed();

        assert_eq!(
            drain(&mut rx),
            vec![
                ExperimentEvent::StateChanged { running: true },
                ExperimentEvent::StateChanged { running: false },
                ExperimentEvent::Completed,
            ]
        );
    }

    #[test]
    fn test_reports_only_for_tracked_ids() {
        let mut controller = ExperimentController::new("scale");
        let mut rx = controller.subscribe();

        assert!(!controller.report_condition("X", true));
        controller.start_tracking(["X", "", "Y"]);
        assert!(controller.is_tracking());
        assert!(controller.report_condition("X", true));

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ExperimentEvent::TrackingChanged { active: true });
        assert_eq!(
            events[1],
            ExperimentEvent::GuideStepStatusChanged { step_id: "X".into(), completed: true }
        );
    }

    #[test]
    fn test_poll_raises_changes_only() {
        let mut guides = GuideRegistry::new();
        guides.insert(GuideDef::from_ids("g", &["X", "Y"]));
        guides.set_current_guide("g");

        let mut controller = ExperimentController::new("lab");
        controller.start_tracking(vec!["X".to_string(), "Y".to_string()]);
        let mut rx = controller.subscribe();

        assert_eq!(controller.poll_tracking(&guides), 2);
        assert_eq!(controller.poll_tracking(&guides), 0);

        guides.complete_step("Y");
        assert_eq!(controller.poll_tracking(&guides), 1);
        assert_eq!(controller.tracking_info(&guides), "Tracking: 1/2 steps completed");

        let events = drain(&mut rx);
        assert_eq!(
            events.last(),
            Some(&ExperimentEvent::GuideStepStatusChanged { step_id: "Y".into(), completed: true })
        );
    }

    #[test]
    fn test_stop_all_tracking_is_idempotent() {
        let mut controller = ExperimentController::new("lab");
        let mut rx = controller.subscribe();

        controller.stop_all_tracking();
        assert!(drain(&mut rx).is_empty());

        controller.start_tracking(["X"]);
        controller.stop_all_tracking();
        controller.stop_all_tracking();
        assert!(!controller.is_tracking());
        assert_eq!(
            drain(&mut rx),
            vec![
                ExperimentEvent::TrackingChanged { active: true },
                ExperimentEvent::TrackingChanged { active: false },
            ]
        );
        assert_eq!(controller.tracking_info(&GuideRegistry::new()), "Tracking: Inactive");
    }

    #[test]
    fn test_release_keeps_ids_other_holders_need() {
        let mut controller = ExperimentController::new("lab");
        controller.start_tracking(["X"]);
        controller.start_tracking(["X", "Y", "Y"]);

        controller.release_tracking(["X"]);
        assert!(controller.is_tracking());
        assert!(controller.report_condition("X", true));

        controller.release_tracking(["X", "Y"]);
        assert!(!controller.is_tracking());
        assert!(!controller.report_condition("Y", true));

        // Releasing ids nobody holds changes nothing
        controller.release_tracking(["Z"]);
        assert!(!controller.is_tracking());
    }

    #[test]
    fn test_stop_tracking_last_id_stops_all() {
        let mut controller = ExperimentController::new("lab");
        controller.start_tracking(["X"]);
        controller.stop_tracking("X");
        assert!(!controller.is_tracking());
    }
}
