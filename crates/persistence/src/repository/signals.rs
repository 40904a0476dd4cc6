//! Trade signal repository
//!
//! Stage results are stored as a JSON array of three slots so the
//! validation schedule can change without schema churn. The store never
//! interprets the slots; the engine serializes the whole array on every
//! stage update.

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A stored trade signal
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SignalRecord {
    pub id: Option<i64>,
    pub symbol: String,
    pub direction: String,
    pub entry_price: f64,
    pub source: String,
    pub status: String,
    pub score: i64,
    /// JSON array of three stage-result slots
    pub stages: String,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
}

/// Fields for a new signal row
#[derive(Debug, Clone)]
pub struct NewSignal<'s> {
    pub symbol: &'s str,
    pub direction: &'s str,
    pub entry_price: f64,
    pub source: &'s str,
    pub status: &'s str,
    pub score: i64,
    pub created_at: i64,
}

const SIGNAL_COLUMNS: &str =
    "id, symbol, direction, entry_price, source, status, score, stages, created_at, resolved_at";

/// Signal totals by status, with hit rate over the resolved ones
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalCounts {
    pub pending: i64,
    pub valid: i64,
    pub invalid: i64,
    pub accuracy: f64,
}

/// Repository for trade signals
pub struct SignalsRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SignalsRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, signal: &NewSignal<'_>) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO signals (symbol, direction, entry_price, source, status, score, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(signal.symbol)
        .bind(signal.direction)
        .bind(signal.entry_price)
        .bind(signal.source)
        .bind(signal.status)
        .bind(signal.score)
        .bind(signal.created_at)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Replace the stage array after a stage resolves
    pub async fn update_stages(&self, id: i64, stages_json: &str) -> DbResult<()> {
        sqlx::query("UPDATE signals SET stages = ? WHERE id = ?")
            .bind(stages_json)
            .bind(id)
            .execute(self.pool)
            .await?;

        Ok(())
    }

    /// Move a signal to its terminal status with its final score and
    /// stage array
    pub async fn finalize(
        &self,
        id: i64,
        status: &str,
        score: i64,
        stages_json: &str,
        resolved_at: i64,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE signals SET status = ?, score = ?, stages = ?, resolved_at = ? WHERE id = ?",
        )
        .bind(status)
        .bind(score)
        .bind(stages_json)
        .bind(resolved_at)
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<SignalRecord>> {
        let record = sqlx::query_as::<_, SignalRecord>(&format!(
            "SELECT {SIGNAL_COLUMNS} FROM signals WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    /// Recent signals, optionally filtered by status
    pub async fn list(&self, status: Option<&str>, limit: i64) -> DbResult<Vec<SignalRecord>> {
        let records = match status {
            Some(status) => {
                sqlx::query_as::<_, SignalRecord>(&format!(
                    r#"
                    SELECT {SIGNAL_COLUMNS} FROM signals
                    WHERE status = ?
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?
                    "#
                ))
                .bind(status)
                .bind(limit)
                .fetch_all(self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, SignalRecord>(&format!(
                    r#"
                    SELECT {SIGNAL_COLUMNS} FROM signals
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?
                    "#
                ))
                .bind(limit)
                .fetch_all(self.pool)
                .await?
            }
        };

        Ok(records)
    }

    pub async fn status_counts(&self) -> DbResult<SignalCounts> {
        let row: (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN status = 'valid' THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN status = 'invalid' THEN 1 ELSE 0 END), 0)
            FROM signals
            "#,
        )
        .fetch_one(self.pool)
        .await?;

        let (pending, valid, invalid) = row;
        let resolved = valid + invalid;
        let accuracy = if resolved > 0 {
            valid as f64 / resolved as f64 * 100.0
        } else {
            0.0
        };

        Ok(SignalCounts {
            pending,
            valid,
            invalid,
            accuracy,
        })
    }

    /// Valid signals scoring at or above the trade threshold, best first
    pub async fn trade_queue(&self, min_score: i64, limit: i64) -> DbResult<Vec<SignalRecord>> {
        let records = sqlx::query_as::<_, SignalRecord>(&format!(
            r#"
            SELECT {SIGNAL_COLUMNS} FROM signals
            WHERE status = 'valid' AND score >= ?
            ORDER BY score DESC, created_at DESC
            LIMIT ?
            "#
        ))
        .bind(min_score)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn new_signal<'s>(symbol: &'s str, score: i64, status: &'s str, created_at: i64) -> NewSignal<'s> {
        NewSignal {
            symbol,
            direction: "LONG",
            entry_price: 100.0,
            source: "whale",
            status,
            score,
            created_at,
        }
    }

    #[tokio::test]
    async fn insert_defaults_to_empty_stage_slots() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.signals();
        let id = repo.insert(&new_signal("BTC", 0, "pending", 1000)).await.unwrap();

        let row = repo.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, "pending");
        assert_eq!(row.stages, "[null,null,null]");
        assert!(row.resolved_at.is_none());
    }

    #[tokio::test]
    async fn stages_and_finalize_update_in_place() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.signals();
        let id = repo.insert(&new_signal("BTC", 0, "pending", 1000)).await.unwrap();

        let stages = r#"[{"price":101.0,"change_percent":1.0,"is_valid":true},null,null]"#;
        repo.update_stages(id, stages).await.unwrap();
        repo.finalize(id, "valid", 50, stages, 1240).await.unwrap();

        let row = repo.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, "valid");
        assert_eq!(row.score, 50);
        assert_eq!(row.stages, stages);
        assert_eq!(row.resolved_at, Some(1240));
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.signals();
        repo.insert(&new_signal("BTC", 0, "pending", 1000)).await.unwrap();
        repo.insert(&new_signal("ETH", 80, "valid", 1001)).await.unwrap();

        let pending = repo.list(Some("pending"), 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].symbol, "BTC");

        let all = repo.list(None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn trade_queue_orders_by_score_and_applies_threshold() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.signals();
        repo.insert(&new_signal("A", 75, "valid", 1000)).await.unwrap();
        repo.insert(&new_signal("B", 100, "valid", 1001)).await.unwrap();
        repo.insert(&new_signal("C", 65, "valid", 1002)).await.unwrap();
        repo.insert(&new_signal("D", 90, "invalid", 1003)).await.unwrap();
        repo.insert(&new_signal("E", 90, "pending", 1004)).await.unwrap();

        let queue = repo.trade_queue(70, 20).await.unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].symbol, "B");
        assert_eq!(queue[1].symbol, "A");
    }
}
