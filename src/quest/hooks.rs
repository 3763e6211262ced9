//! Reward Hooks
//!
//! Async callbacks run around quest completion. The coordinator awaits them
//! in order: before-reward, grant, after-reward.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::definition::Reward;
use crate::db::Database;

/// What a completed quest hands to the hooks and the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestSummary {
    pub quest_id: String,
    pub name: String,
    pub steps: usize,
    pub reward: Reward,
    pub completed_at: DateTime<Utc>,
}

pub trait RewardHooks: Send + Sync {
    fn before_reward<'a>(&'a self, _summary: &'a QuestSummary) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }

    /// Grant the reward. An error restarts the quest.
    fn grant_reward<'a>(&'a self, summary: &'a QuestSummary) -> BoxFuture<'a, Result<(), String>>;

    fn after_reward<'a>(&'a self, _summary: &'a QuestSummary) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

/// Grants by logging only
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingRewards;

impl RewardHooks for LoggingRewards {
    fn grant_reward<'a>(&'a self, summary: &'a QuestSummary) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            info!(
                "Granted quest '{}': {} points, badges {:?}",
                summary.quest_id, summary.reward.points, summary.reward.badges
            );
            Ok(())
        })
    }
}

/// Writes every granted reward to the completion ledger
#[derive(Debug, Clone)]
pub struct LedgerRewards {
    db: Database,
}

impl LedgerRewards {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl RewardHooks for LedgerRewards {
    fn grant_reward<'a>(&'a self, summary: &'a QuestSummary) -> BoxFuture<'a, Result<(), String>> {
        Box::pin(async move {
            self.db
                .record_completion(summary)
                .await
                .map_err(|e| format!("Database error: {}", e))
        })
    }

    fn after_reward<'a>(&'a self, summary: &'a QuestSummary) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if let Err(e) = self.db.clear_progress(&summary.quest_id).await {
                tracing::warn!("Failed to clear progress for {}: {}", summary.quest_id, e);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ledger_rewards_persist() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let hooks = LedgerRewards::new(db.clone());
        let summary = QuestSummary {
            quest_id: "intro".into(),
            name: "Intro".into(),
            steps: 1,
            reward: Reward { points: 5, badges: vec![] },
            completed_at: Utc::now(),
        };

        hooks.before_reward(&summary).await;
        hooks.grant_reward(&summary).await.unwrap();
        hooks.after_reward(&summary).await;

        assert_eq!(db.total_points().await.unwrap(), 5);
    }
}
