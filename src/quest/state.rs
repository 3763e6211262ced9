//! Quest State Tracking
//!
//! Quest lifecycle states, activation tickets, and the progress records that
//! are persisted between sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of one quest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestState {
    /// Required quests are not complete yet
    Locked,
    NotStarted,
    InProgress,
    Complete,
}

impl QuestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestState::Locked => "locked",
            QuestState::NotStarted => "not_started",
            QuestState::InProgress => "in_progress",
            QuestState::Complete => "complete",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "locked" => Some(QuestState::Locked),
            "not_started" => Some(QuestState::NotStarted),
            "in_progress" => Some(QuestState::InProgress),
            "complete" | "completed" => Some(QuestState::Complete),
            _ => None,
        }
    }
}

/// Identifies one activation of one step. Host callbacks that arrive later
/// carry the ticket they were issued with; a ticket whose generation no
/// longer matches the quest is stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepTicket {
    pub quest_id: String,
    pub step_index: usize,
    pub generation: u64,
}

/// Persisted progress of one quest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestProgressRecord {
    pub quest_id: String,
    pub state: QuestState,
    /// Index of the active step, meaningful while in progress
    pub current_step: usize,
    pub completed_steps: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl QuestProgressRecord {
    /// Serialize completed steps to JSON for database storage
    pub fn completed_steps_to_json(&self) -> String {
        serde_json::to_string(&self.completed_steps).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn completed_steps_from_json(json: &str) -> Vec<String> {
        serde_json::from_str(json).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_strings() {
        for state in [
            QuestState::Locked,
            QuestState::NotStarted,
            QuestState::InProgress,
            QuestState::Complete,
        ] {
            assert_eq!(QuestState::from_str(state.as_str()), Some(state));
        }
        assert_eq!(QuestState::from_str("completed"), Some(QuestState::Complete));
        assert_eq!(QuestState::from_str("abandoned"), None);
    }

    #[test]
    fn test_completed_steps_json() {
        let record = QuestProgressRecord {
            quest_id: "q".into(),
            state: QuestState::InProgress,
            current_step: 1,
            completed_steps: vec!["a".into()],
            updated_at: Utc::now(),
        };
        assert_eq!(record.completed_steps_to_json(), r#"["a"]"#);
        assert!(QuestProgressRecord::completed_steps_from_json("not json").is_empty());
    }
}
