//! Experiment Hub
//!
//! Name-keyed lookup for experiment controllers. Quest steps never own a
//! controller; they find it here by name when they start.

use std::collections::HashMap;

use tracing::{info, warn};

use super::controller::{ExperimentController, DEFAULT_EVENT_CAPACITY};
use crate::guide::GuideRegistry;

#[derive(Debug)]
pub struct ExperimentHub {
    controllers: HashMap<String, ExperimentController>,
    event_capacity: usize,
}

impl Default for ExperimentHub {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl ExperimentHub {
    pub fn new(event_capacity: usize) -> Self {
        Self {
            controllers: HashMap::new(),
            event_capacity,
        }
    }

    /// Register a controller by name, returning the existing one if present
    pub fn register(&mut self, name: &str) -> &mut ExperimentController {
        let capacity = self.event_capacity;
        self.controllers.entry(name.to_string()).or_insert_with(|| {
            info!("Registered experiment controller: {}", name);
            ExperimentController::with_capacity(name, capacity)
        })
    }

    pub fn get(&self, name: &str) -> Option<&ExperimentController> {
        self.controllers.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ExperimentController> {
        let controller = self.controllers.get_mut(name);
        if controller.is_none() {
            warn!("Experiment controller '{}' not found", name);
        }
        controller
    }

    pub fn contains(&self, name: &str) -> bool {
        self.controllers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.controllers.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExperimentController> {
        self.controllers.values()
    }

    /// Run one tracking tick on every controller
    pub fn poll_all(&mut self, guides: &GuideRegistry) -> usize {
        self.controllers
            .values_mut()
            .map(|c| c.poll_tracking(guides))
            .sum()
    }
}
