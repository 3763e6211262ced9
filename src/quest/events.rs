//! Quest Event Types
//!
//! `QuestEvent` flows from the host into quests. `QuestNotice` flows back out:
//! directives for the host (play a cue, show options) and progress reports.

use serde::{Deserialize, Serialize};

use super::cue::Cue;
use super::hooks::QuestSummary;
use super::reading::ReadingAssignment;
use super::state::StepTicket;

/// Events that can move a quest step forward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestEvent {
    /// Named signal published by the host (button pressed, NPC talked to)
    Signal { name: String },

    /// The book was turned to a spread; `page` is the left page
    PageChanged { page: u32 },

    /// The learner picked an option from a presented menu
    OptionSelected { ticket: StepTicket, option_id: String },

    /// A cue the host was asked to play has finished
    CueFinished { ticket: StepTicket },
}

impl QuestEvent {
    /// Ticket for events answering a directive; broadcast events have none
    pub fn ticket(&self) -> Option<&StepTicket> {
        match self {
            QuestEvent::OptionSelected { ticket, .. } | QuestEvent::CueFinished { ticket } => {
                Some(ticket)
            }
            QuestEvent::Signal { .. } | QuestEvent::PageChanged { .. } => None,
        }
    }

    /// Get event type as string (for logging/debugging)
    pub fn event_type(&self) -> &'static str {
        match self {
            QuestEvent::Signal { .. } => "signal",
            QuestEvent::PageChanged { .. } => "page_changed",
            QuestEvent::OptionSelected { .. } => "option_selected",
            QuestEvent::CueFinished { .. } => "cue_finished",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionChoice {
    pub id: String,
    pub label: String,
}

/// Output of the coordinator, drained by the host
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestNotice {
    QuestStarted {
        quest_id: String,
    },
    StepStarted {
        ticket: StepTicket,
        step_id: String,
    },
    StepCompleted {
        quest_id: String,
        step_id: String,
    },
    PlayCue {
        ticket: StepTicket,
        cue: Cue,
    },
    PresentOptions {
        ticket: StepTicket,
        options: Vec<OptionChoice>,
    },
    DismissOptions {
        ticket: StepTicket,
    },
    ReadingAssigned {
        ticket: StepTicket,
        start_page: u32,
        end_page: u32,
        assignment: Option<ReadingAssignment>,
    },
    ReadingProgress {
        quest_id: String,
        step_id: String,
        pages_read: usize,
        required: usize,
    },
    QuestCompleted {
        summary: QuestSummary,
    },
    RewardFailed {
        quest_id: String,
        reason: String,
    },
    QuestRestarted {
        quest_id: String,
    },
    QuestUnlocked {
        quest_id: String,
    },
    GuideFinished {
        guide_id: String,
    },
}

impl QuestNotice {
    pub fn notice_type(&self) -> &'static str {
        match self {
            QuestNotice::QuestStarted { .. } => "quest_started",
            QuestNotice::StepStarted { .. } => "step_started",
            QuestNotice::StepCompleted { .. } => "step_completed",
            QuestNotice::PlayCue { .. } => "play_cue",
            QuestNotice::PresentOptions { .. } => "present_options",
            QuestNotice::DismissOptions { .. } => "dismiss_options",
            QuestNotice::ReadingAssigned { .. } => "reading_assigned",
            QuestNotice::ReadingProgress { .. } => "reading_progress",
            QuestNotice::QuestCompleted { .. } => "quest_completed",
            QuestNotice::RewardFailed { .. } => "reward_failed",
            QuestNotice::QuestRestarted { .. } => "quest_restarted",
            QuestNotice::QuestUnlocked { .. } => "quest_unlocked",
            QuestNotice::GuideFinished { .. } => "guide_finished",
        }
    }
}
