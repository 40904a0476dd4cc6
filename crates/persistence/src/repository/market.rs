//! Market snapshot and indicator repository

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// One per-cycle snapshot row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SnapshotRecord {
    pub id: Option<i64>,
    pub symbol: String,
    pub price: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub volume: f64,
    pub change_24h: f64,
    pub timestamp: i64,
}

/// Indicator values captured alongside a whale event
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IndicatorRecord {
    pub id: Option<i64>,
    pub symbol: String,
    pub rsi: Option<f64>,
    pub macd_line: Option<f64>,
    pub signal_line: Option<f64>,
    pub histogram: Option<f64>,
    pub ema_20: Option<f64>,
    pub volume_avg: Option<f64>,
    pub timestamp: i64,
}

/// Repository for market snapshots and indicator captures
pub struct MarketRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MarketRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_snapshot(&self, record: &SnapshotRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO ohlcv (symbol, price, high_24h, low_24h, volume, change_24h, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.symbol)
        .bind(record.price)
        .bind(record.high_24h)
        .bind(record.low_24h)
        .bind(record.volume)
        .bind(record.change_24h)
        .bind(record.timestamp)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// The newest snapshot per symbol, highest volume first
    pub async fn latest_snapshots(&self) -> DbResult<Vec<SnapshotRecord>> {
        let records = sqlx::query_as::<_, SnapshotRecord>(
            r#"
            SELECT id, symbol, price, high_24h, low_24h, volume, change_24h, timestamp
            FROM ohlcv
            WHERE id IN (SELECT MAX(id) FROM ohlcv GROUP BY symbol)
            ORDER BY volume DESC
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    pub async fn insert_indicators(&self, record: &IndicatorRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO indicators (symbol, rsi, macd_line, signal_line, histogram, ema_20, volume_avg, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.symbol)
        .bind(record.rsi)
        .bind(record.macd_line)
        .bind(record.signal_line)
        .bind(record.histogram)
        .bind(record.ema_20)
        .bind(record.volume_avg)
        .bind(record.timestamp)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn snapshot(symbol: &str, price: f64, volume: f64, ts: i64) -> SnapshotRecord {
        SnapshotRecord {
            id: None,
            symbol: symbol.to_string(),
            price,
            high_24h: price * 1.05,
            low_24h: price * 0.95,
            volume,
            change_24h: 1.0,
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn latest_snapshots_keep_one_row_per_symbol() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.market();
        repo.insert_snapshot(&snapshot("BTC", 100.0, 900.0, 1)).await.unwrap();
        repo.insert_snapshot(&snapshot("BTC", 101.0, 900.0, 2)).await.unwrap();
        repo.insert_snapshot(&snapshot("ETH", 50.0, 2_000.0, 2)).await.unwrap();

        let rows = repo.latest_snapshots().await.unwrap();
        assert_eq!(rows.len(), 2);
        // higher-volume symbol first
        assert_eq!(rows[0].symbol, "ETH");
        let btc = rows.iter().find(|r| r.symbol == "BTC").unwrap();
        assert_eq!(btc.price, 101.0);
    }

    #[tokio::test]
    async fn indicator_rows_accept_missing_values() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.market();
        let id = repo
            .insert_indicators(&IndicatorRecord {
                id: None,
                symbol: "BTC".to_string(),
                rsi: Some(62.5),
                macd_line: None,
                signal_line: None,
                histogram: None,
                ema_20: None,
                volume_avg: Some(1_000.0),
                timestamp: 100,
            })
            .await
            .unwrap();
        assert!(id > 0);
    }
}
