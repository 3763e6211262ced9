//! Experiment Adapter Module
//!
//! Bridges lab simulations to guide-step completion by string id.

pub mod controller;
pub mod events;
pub mod hub;

pub use controller::ExperimentController;
pub use events::ExperimentEvent;
pub use hub::ExperimentHub;
