//! Completion ledger used to gate quests behind their prerequisites.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct QuestPermissions {
    completed: BTreeSet<String>,
}

impl QuestPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_completed(&self, quest_id: &str) -> bool {
        self.completed.contains(quest_id)
    }

    /// True when every listed quest is complete (vacuously true for none)
    pub fn has_all(&self, quest_ids: &[String]) -> bool {
        quest_ids.iter().all(|id| self.completed.contains(id))
    }

    /// Returns false when the quest was already recorded
    pub fn mark_completed(&mut self, quest_id: &str) -> bool {
        self.completed.insert(quest_id.to_string())
    }

    pub fn completed(&self) -> impl Iterator<Item = &String> {
        self.completed.iter()
    }

    pub fn len(&self) -> usize {
        self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirements() {
        let mut permissions = QuestPermissions::new();
        let requires = vec!["intro".to_string(), "safety".to_string()];

        assert!(permissions.has_all(&[]));
        assert!(!permissions.has_all(&requires));
        assert!(permissions.mark_completed("intro"));
        assert!(!permissions.mark_completed("intro"));
        assert!(!permissions.has_all(&requires));
        permissions.mark_completed("safety");
        assert!(permissions.has_all(&requires));
        assert_eq!(permissions.len(), 2);
    }
}
