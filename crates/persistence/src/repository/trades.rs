//! Executed trade repository and PnL aggregates

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A stored trade, open or closed
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRecord {
    pub id: Option<i64>,
    pub signal_id: i64,
    pub symbol: String,
    pub direction: String,
    pub entry_price: f64,
    pub amount: f64,
    pub leverage: i64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub status: String,
    pub exit_price: Option<f64>,
    pub close_reason: Option<String>,
    pub pnl: Option<f64>,
    pub pnl_percent: Option<f64>,
    pub commission: f64,
    pub net_pnl: Option<f64>,
    pub opened_at: i64,
    pub closed_at: Option<i64>,
}

/// Fields for opening a trade row
#[derive(Debug, Clone)]
pub struct NewTrade<'s> {
    pub signal_id: i64,
    pub symbol: &'s str,
    pub direction: &'s str,
    pub entry_price: f64,
    pub amount: f64,
    pub leverage: i64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub commission: f64,
    pub opened_at: i64,
}

/// Settlement fields recorded when a trade closes
#[derive(Debug, Clone)]
pub struct TradeSettlement<'s> {
    pub exit_price: f64,
    pub close_reason: &'s str,
    pub pnl: f64,
    pub pnl_percent: f64,
    pub commission: f64,
    pub net_pnl: f64,
    pub closed_at: i64,
}

/// Aggregated outcome of closed trades over a period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeStats {
    pub total: i64,
    pub wins: i64,
    pub losses: i64,
    pub pnl: f64,
    pub commission: f64,
    pub win_rate: f64,
}

const TRADE_COLUMNS: &str = "id, signal_id, symbol, direction, entry_price, amount, leverage, \
     stop_loss, take_profit, status, exit_price, close_reason, pnl, pnl_percent, commission, \
     net_pnl, opened_at, closed_at";

/// Repository for executed trades
pub struct TradesRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> TradesRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_open(&self, trade: &NewTrade<'_>) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO trades (signal_id, symbol, direction, entry_price, amount, leverage,
                                stop_loss, take_profit, commission, opened_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(trade.signal_id)
        .bind(trade.symbol)
        .bind(trade.direction)
        .bind(trade.entry_price)
        .bind(trade.amount)
        .bind(trade.leverage)
        .bind(trade.stop_loss)
        .bind(trade.take_profit)
        .bind(trade.commission)
        .bind(trade.opened_at)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn close(&self, id: i64, settlement: &TradeSettlement<'_>) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE trades
            SET status = 'closed', exit_price = ?, close_reason = ?, pnl = ?, pnl_percent = ?,
                commission = ?, net_pnl = ?, closed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(settlement.exit_price)
        .bind(settlement.close_reason)
        .bind(settlement.pnl)
        .bind(settlement.pnl_percent)
        .bind(settlement.commission)
        .bind(settlement.net_pnl)
        .bind(settlement.closed_at)
        .bind(id)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    pub async fn open_trades(&self) -> DbResult<Vec<TradeRecord>> {
        let records = sqlx::query_as::<_, TradeRecord>(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE status = 'open' ORDER BY opened_at ASC"
        ))
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    pub async fn recent(&self, limit: i64) -> DbResult<Vec<TradeRecord>> {
        let records = sqlx::query_as::<_, TradeRecord>(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades ORDER BY opened_at DESC, id DESC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Aggregate closed trades settled at or after the given epoch second
    pub async fn stats_since(&self, since: i64) -> DbResult<TradeStats> {
        let row: (i64, i64, i64, f64, f64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(CASE WHEN net_pnl >= 0 THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN net_pnl < 0 THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(net_pnl), 0.0),
                   COALESCE(SUM(commission), 0.0)
            FROM trades
            WHERE status = 'closed' AND closed_at >= ?
            "#,
        )
        .bind(since)
        .fetch_one(self.pool)
        .await?;

        let (total, wins, losses, pnl, commission) = row;
        let win_rate = if total > 0 {
            wins as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        Ok(TradeStats {
            total,
            wins,
            losses,
            pnl,
            commission,
            win_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn open_trade(signal_id: i64, opened_at: i64) -> NewTrade<'static> {
        NewTrade {
            signal_id,
            symbol: "BTC",
            direction: "LONG",
            entry_price: 100.0,
            amount: 5.0,
            leverage: 5,
            stop_loss: 98.0,
            take_profit: 104.0,
            commission: 0.0025,
            opened_at,
        }
    }

    fn winning_settlement(closed_at: i64) -> TradeSettlement<'static> {
        TradeSettlement {
            exit_price: 104.0,
            close_reason: "take_profit",
            pnl: 1.0,
            pnl_percent: 20.0,
            commission: 0.005,
            net_pnl: 0.995,
            closed_at,
        }
    }

    #[tokio::test]
    async fn new_trade_is_open_until_closed() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.trades();
        let id = repo.insert_open(&open_trade(1, 1000)).await.unwrap();

        let open = repo.open_trades().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].status, "open");
        assert!(open[0].exit_price.is_none());

        repo.close(id, &winning_settlement(2000)).await.unwrap();
        assert!(repo.open_trades().await.unwrap().is_empty());

        let all = repo.recent(10).await.unwrap();
        assert_eq!(all[0].status, "closed");
        assert_eq!(all[0].close_reason.as_deref(), Some("take_profit"));
        assert_eq!(all[0].net_pnl, Some(0.995));
    }

    #[tokio::test]
    async fn stats_aggregate_only_closed_trades_in_range() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.trades();

        let a = repo.insert_open(&open_trade(1, 1000)).await.unwrap();
        repo.close(a, &winning_settlement(5000)).await.unwrap();

        let b = repo.insert_open(&open_trade(2, 1001)).await.unwrap();
        repo.close(
            b,
            &TradeSettlement {
                exit_price: 98.0,
                close_reason: "stop_loss",
                pnl: -0.5,
                pnl_percent: -10.0,
                commission: 0.005,
                net_pnl: -0.505,
                closed_at: 6000,
            },
        )
        .await
        .unwrap();

        // still open, must not count
        repo.insert_open(&open_trade(3, 1002)).await.unwrap();

        let stats = repo.stats_since(0).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.losses, 1);
        assert!((stats.pnl - 0.49).abs() < 1e-9);
        assert!((stats.commission - 0.01).abs() < 1e-9);
        assert!((stats.win_rate - 50.0).abs() < 1e-9);

        // window excludes the earlier winner
        let stats = repo.stats_since(5500).await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.losses, 1);
    }

    #[tokio::test]
    async fn empty_stats_have_zero_win_rate() {
        let db = Database::in_memory().await.unwrap();
        let stats = db.trades().stats_since(0).await.unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.win_rate, 0.0);
    }
}
