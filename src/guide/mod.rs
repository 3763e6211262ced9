//! Guide System Module
//!
//! Ordered tutorial checkpoints for a lab experiment. Any step may be completed
//! at any time; the registry only keeps a cursor for display.

pub mod definition;
pub mod exam;
pub mod registry;

pub use definition::{GuideDef, GuideStepDef};
pub use exam::{ExamStepTracker, ExamSummary};
pub use registry::{GuideChange, GuideRegistry, GuideStep};
