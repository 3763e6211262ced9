use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::quest::{QuestProgressRecord, QuestState, QuestSummary};

/// A completed quest as stored in the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedQuestRow {
    pub quest_id: String,
    pub points: i32,
    pub badges_json: String, // JSON serialized badge list
    pub completed_at: String,
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        // Every in-memory connection is its own database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        // Run migrations
        Self::migrate(&pool).await?;

        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS completed_quests (
                quest_id TEXT PRIMARY KEY,
                points INTEGER NOT NULL DEFAULT 0,
                badges_json TEXT DEFAULT '[]',
                completed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quest_progress (
                quest_id TEXT PRIMARY KEY,
                state TEXT NOT NULL DEFAULT 'not_started',
                current_step INTEGER NOT NULL DEFAULT 0,
                completed_steps_json TEXT DEFAULT '[]',
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        tracing::info!("Database migrations complete");
        Ok(())
    }

    /// Record a completed quest. Completing the same quest again keeps the
    /// newest timestamp.
    pub async fn record_completion(&self, summary: &QuestSummary) -> Result<(), sqlx::Error> {
        let badges_json =
            serde_json::to_string(&summary.reward.badges).unwrap_or_else(|_| "[]".to_string());

        sqlx::query(
            r#"INSERT INTO completed_quests (quest_id, points, badges_json, completed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(quest_id) DO UPDATE SET
                points = excluded.points,
                badges_json = excluded.badges_json,
                completed_at = excluded.completed_at"#,
        )
        .bind(&summary.quest_id)
        .bind(summary.reward.points)
        .bind(&badges_json)
        .bind(summary.completed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::info!("Recorded completion of quest {}", summary.quest_id);
        Ok(())
    }

    pub async fn completed_quests(&self) -> Result<Vec<CompletedQuestRow>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT quest_id, points, badges_json, completed_at FROM completed_quests ORDER BY completed_at",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| CompletedQuestRow {
                quest_id: r.get("quest_id"),
                points: r.get("points"),
                badges_json: r.get("badges_json"),
                completed_at: r.get("completed_at"),
            })
            .collect())
    }

    pub async fn total_points(&self) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COALESCE(SUM(points), 0) AS total FROM completed_quests")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("total"))
    }

    pub async fn save_progress(&self, record: &QuestProgressRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO quest_progress (quest_id, state, current_step, completed_steps_json, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(quest_id) DO UPDATE SET
                state = excluded.state,
                current_step = excluded.current_step,
                completed_steps_json = excluded.completed_steps_json,
                updated_at = excluded.updated_at"#,
        )
        .bind(&record.quest_id)
        .bind(record.state.as_str())
        .bind(record.current_step as i64)
        .bind(record.completed_steps_to_json())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load every progress record. Rows with an unknown state are skipped.
    pub async fn load_progress(&self) -> Result<Vec<QuestProgressRecord>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT quest_id, state, current_step, completed_steps_json, updated_at FROM quest_progress",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for r in rows {
            let quest_id: String = r.get("quest_id");
            let state: String = r.get("state");
            let Some(state) = QuestState::from_str(&state) else {
                tracing::warn!("Skipping progress for {} with unknown state '{}'", quest_id, state);
                continue;
            };
            let current_step: i64 = r.get("current_step");
            let completed_json: String = r.get("completed_steps_json");
            let updated_at: String = r.get("updated_at");

            records.push(QuestProgressRecord {
                quest_id,
                state,
                current_step: current_step.max(0) as usize,
                completed_steps: QuestProgressRecord::completed_steps_from_json(&completed_json),
                updated_at: DateTime::parse_from_rfc3339(&updated_at)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            });
        }
        Ok(records)
    }

    pub async fn clear_progress(&self, quest_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM quest_progress WHERE quest_id = ?")
            .bind(quest_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::Reward;

    fn summary(quest_id: &str, points: i32) -> QuestSummary {
        QuestSummary {
            quest_id: quest_id.to_string(),
            name: quest_id.to_uppercase(),
            steps: 2,
            reward: Reward { points, badges: vec!["lab".into()] },
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_completion_ledger() {
        let db = Database::new("sqlite::memory:").await.unwrap();

        db.record_completion(&summary("intro", 10)).await.unwrap();
        db.record_completion(&summary("heat", 25)).await.unwrap();
        db.record_completion(&summary("heat", 30)).await.unwrap();

        let rows = db.completed_quests().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(db.total_points().await.unwrap(), 40);
        assert!(rows.iter().any(|r| r.quest_id == "heat" && r.badges_json == r#"["lab"]"#));
    }

    #[tokio::test]
    async fn test_progress_records() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let record = QuestProgressRecord {
            quest_id: "heat".into(),
            state: QuestState::InProgress,
            current_step: 1,
            completed_steps: vec!["greet".into()],
            updated_at: Utc::now(),
        };

        db.save_progress(&record).await.unwrap();
        let loaded = db.load_progress().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].state, QuestState::InProgress);
        assert_eq!(loaded[0].completed_steps, vec!["greet".to_string()]);

        db.clear_progress("heat").await.unwrap();
        assert!(db.load_progress().await.unwrap().is_empty());
    }
}
