//! Whale and pump/dump event repository

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A stored whale activity event
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WhaleRecord {
    pub id: Option<i64>,
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
    pub change_percent: f64,
    pub side: String,
    pub confidence: f64,
    pub pattern: Option<String>,
    pub timestamp: i64,
}

/// A stored pump/dump event. Validation columns stay NULL until the
/// timed check resolves.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PumpDumpRecord {
    pub id: Option<i64>,
    pub symbol: String,
    pub kind: String,
    pub price_before: f64,
    pub price_after: f64,
    pub change_percent: f64,
    pub volume: f64,
    pub is_valid: Option<bool>,
    pub validation_price: Option<f64>,
    pub score: Option<i64>,
    pub timestamp: i64,
}

/// Whale buy/sell volume totals over a window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleFlow {
    pub inflow: f64,
    pub outflow: f64,
    pub net: f64,
}

/// Repository for detection events
pub struct EventsRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> EventsRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_whale(&self, record: &WhaleRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO whales (symbol, price, volume, change_percent, side, confidence, pattern, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.symbol)
        .bind(record.price)
        .bind(record.volume)
        .bind(record.change_percent)
        .bind(&record.side)
        .bind(record.confidence)
        .bind(&record.pattern)
        .bind(record.timestamp)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn recent_whales(&self, limit: i64) -> DbResult<Vec<WhaleRecord>> {
        let records = sqlx::query_as::<_, WhaleRecord>(
            r#"
            SELECT id, symbol, price, volume, change_percent, side, confidence, pattern, timestamp
            FROM whales
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Buy volume vs sell volume since the given epoch second
    pub async fn whale_flow_since(&self, since: i64) -> DbResult<WhaleFlow> {
        let row: (f64, f64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(CASE WHEN side = 'buy' THEN volume ELSE 0.0 END), 0.0),
                   COALESCE(SUM(CASE WHEN side = 'sell' THEN volume ELSE 0.0 END), 0.0)
            FROM whales
            WHERE timestamp >= ?
            "#,
        )
        .bind(since)
        .fetch_one(self.pool)
        .await?;

        Ok(WhaleFlow {
            inflow: row.0,
            outflow: row.1,
            net: row.0 - row.1,
        })
    }

    pub async fn insert_pump_dump(&self, record: &PumpDumpRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO pump_dumps (symbol, kind, price_before, price_after, change_percent, volume, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.symbol)
        .bind(&record.kind)
        .bind(record.price_before)
        .bind(record.price_after)
        .bind(record.change_percent)
        .bind(record.volume)
        .bind(record.timestamp)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Record the one-shot validation outcome for a pump/dump event
    pub async fn record_pump_validation(
        &self,
        id: i64,
        is_valid: bool,
        validation_price: f64,
        score: i64,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE pump_dumps SET is_valid = ?, validation_price = ?, score = ? WHERE id = ?",
        )
        .bind(is_valid)
        .bind(validation_price)
        .bind(score)
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    pub async fn recent_pump_dumps(&self, limit: i64) -> DbResult<Vec<PumpDumpRecord>> {
        let records = sqlx::query_as::<_, PumpDumpRecord>(
            r#"
            SELECT id, symbol, kind, price_before, price_after, change_percent, volume,
                   is_valid, validation_price, score, timestamp
            FROM pump_dumps
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }
}
