//! Quest System Module
//!
//! TOML-authored quests made of sequential steps. Steps are simple signals,
//! option menus, experiment tracking, or book reading.

pub mod controller;
pub mod cue;
pub mod definition;
pub mod events;
pub mod hooks;
pub mod permissions;
pub mod reading;
pub mod registry;
pub mod state;
pub mod step;

pub use controller::{QuestAdvance, QuestController};
pub use cue::{Cue, CueKind, CueTable};
pub use definition::{
    ExperimentAction, QuestDef, ReadingRange, Reward, StepDef, StepKind, TrackingPolicy,
};
pub use events::{OptionChoice, QuestEvent, QuestNotice};
pub use hooks::{LedgerRewards, LoggingRewards, QuestSummary, RewardHooks};
pub use permissions::QuestPermissions;
pub use reading::{RandomMode, ReadingAssignment, ReadingProgress, SubjectCatalogue};
pub use registry::{Content, ContentRegistry, HotReloadEvent};
pub use state::{QuestProgressRecord, QuestState, StepTicket};
pub use step::{QuestStep, StepContext};
