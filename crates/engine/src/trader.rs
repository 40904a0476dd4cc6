//! Risk-gated trade execution and open-position monitoring
//!
//! The trader owns only its process-lifetime state: risk counters, the
//! open position set, and the ids of signals it already entered. Trade
//! rows live in the store; the worker persists what this module returns.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};

use crate::config::BotConfig;
use crate::exchange::ExchangeClient;
use crate::types::{CloseReason, ClosedPosition, Position, TradeDirection};

/// Why the risk gate refused to open a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeRefusal {
    DailyLimitReached,
    LossStreakLimitReached,
}

/// A valid scored signal pulled from the store's trade queue
#[derive(Debug, Clone)]
pub struct QueuedSignal {
    pub id: i64,
    pub symbol: String,
    pub direction: TradeDirection,
    pub entry_price: f64,
    pub score: u32,
}

/// A trade the exchange accepted, ready to be persisted and tracked
#[derive(Debug, Clone)]
pub struct OpenedTrade {
    pub signal_id: i64,
    pub symbol: String,
    pub direction: TradeDirection,
    pub entry_price: f64,
    pub amount: f64,
    pub leverage: u32,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub entry_commission: f64,
}

/// Point-in-time view of the trader's counters
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct TraderCounters {
    pub daily_trades: u32,
    pub consecutive_losses: u32,
    pub open_positions: usize,
}

pub struct AutoTrader {
    daily_trades: u32,
    consecutive_losses: u32,
    counter_date: NaiveDate,
    open_positions: HashMap<i64, Position>,
    traded_signals: HashSet<i64>,
}

impl AutoTrader {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            daily_trades: 0,
            consecutive_losses: 0,
            counter_date: today,
            open_positions: HashMap::new(),
            traded_signals: HashSet::new(),
        }
    }

    pub fn counters(&self) -> TraderCounters {
        TraderCounters {
            daily_trades: self.daily_trades,
            consecutive_losses: self.consecutive_losses,
            open_positions: self.open_positions.len(),
        }
    }

    /// Check the risk gate for a new trade. Both counters reset on the
    /// first call of a new day, so a loss streak never carries overnight.
    pub fn can_trade(&mut self, today: NaiveDate, cfg: &BotConfig) -> Result<(), TradeRefusal> {
        if today != self.counter_date {
            self.counter_date = today;
            self.daily_trades = 0;
            self.consecutive_losses = 0;
        }
        if self.daily_trades >= cfg.max_daily_trades {
            return Err(TradeRefusal::DailyLimitReached);
        }
        if self.consecutive_losses >= cfg.max_consecutive_losses {
            return Err(TradeRefusal::LossStreakLimitReached);
        }
        Ok(())
    }

    /// A signal is entered at most once per process lifetime
    pub fn already_traded(&self, signal_id: i64) -> bool {
        self.traded_signals.contains(&signal_id)
    }

    /// Submit the order and account for it. Counters move only after the
    /// exchange accepts; a rejected order leaves the trader untouched so
    /// the signal can be retried next cycle.
    pub async fn execute(
        &mut self,
        signal: &QueuedSignal,
        cfg: &BotConfig,
        exchange: &dyn ExchangeClient,
    ) -> Result<OpenedTrade> {
        let (stop_loss, take_profit) = protective_prices(
            signal.direction,
            signal.entry_price,
            cfg.stop_loss_percent,
            cfg.take_profit_percent,
        );

        exchange
            .create_order(&signal.symbol, signal.direction, cfg.trade_amount)
            .await?;

        self.daily_trades += 1;
        self.traded_signals.insert(signal.id);
        info!(
            symbol = %signal.symbol,
            direction = signal.direction.as_str(),
            entry = signal.entry_price,
            score = signal.score,
            "trade opened"
        );

        Ok(OpenedTrade {
            signal_id: signal.id,
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            entry_price: signal.entry_price,
            amount: cfg.trade_amount,
            leverage: cfg.leverage,
            stop_loss,
            take_profit,
            entry_commission: cfg.trade_amount * cfg.commission_percent / 100.0,
        })
    }

    /// Begin monitoring a persisted trade
    pub fn track(&mut self, position: Position) {
        self.open_positions.insert(position.trade_id, position);
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.open_positions.values()
    }

    /// Settle every open position whose stop or target has been hit.
    /// Positions whose symbol has no price this cycle are left open.
    /// Nothing is removed here; a position keeps settling each pass
    /// until `confirm_close` confirms the write.
    pub fn check_open_positions(
        &self,
        prices: &HashMap<String, f64>,
        now: DateTime<Utc>,
        cfg: &BotConfig,
    ) -> Vec<ClosedPosition> {
        let mut closed = Vec::new();

        for position in self.open_positions.values() {
            let Some(&price) = prices.get(position.symbol.as_str()) else {
                continue;
            };
            let Some(reason) = exit_reason(position, price) else {
                continue;
            };
            closed.push(settle(position.clone(), price, reason, now, cfg));
        }
        closed
    }

    /// Apply a persisted settlement: drop the position and move the
    /// loss streak
    pub fn confirm_close(&mut self, closed: &ClosedPosition) {
        self.open_positions.remove(&closed.position.trade_id);
        if closed.net_pnl < 0.0 {
            self.consecutive_losses += 1;
            warn!(
                symbol = %closed.position.symbol,
                net_pnl = closed.net_pnl,
                streak = self.consecutive_losses,
                "losing trade closed"
            );
        } else {
            self.consecutive_losses = 0;
        }
    }
}

/// Stop and target prices on the correct side of entry for the direction
fn protective_prices(
    direction: TradeDirection,
    entry: f64,
    stop_loss_percent: f64,
    take_profit_percent: f64,
) -> (f64, f64) {
    match direction {
        TradeDirection::Long => (
            entry * (1.0 - stop_loss_percent / 100.0),
            entry * (1.0 + take_profit_percent / 100.0),
        ),
        TradeDirection::Short => (
            entry * (1.0 + stop_loss_percent / 100.0),
            entry * (1.0 - take_profit_percent / 100.0),
        ),
    }
}

fn exit_reason(position: &Position, price: f64) -> Option<CloseReason> {
    match position.direction {
        TradeDirection::Long => {
            if price <= position.stop_loss {
                Some(CloseReason::StopLoss)
            } else if price >= position.take_profit {
                Some(CloseReason::TakeProfit)
            } else {
                None
            }
        }
        TradeDirection::Short => {
            if price >= position.stop_loss {
                Some(CloseReason::StopLoss)
            } else if price <= position.take_profit {
                Some(CloseReason::TakeProfit)
            } else {
                None
            }
        }
    }
}

/// Direction-signed PnL on leveraged margin, with round-trip commission
fn settle(
    position: Position,
    exit_price: f64,
    reason: CloseReason,
    now: DateTime<Utc>,
    cfg: &BotConfig,
) -> ClosedPosition {
    let raw_change = (exit_price - position.entry_price) / position.entry_price;
    let signed_change = match position.direction {
        TradeDirection::Long => raw_change,
        TradeDirection::Short => -raw_change,
    };
    let pnl = signed_change * position.amount * position.leverage as f64;
    let pnl_percent = signed_change * 100.0 * position.leverage as f64;
    let commission = position.amount * cfg.commission_percent / 100.0 * 2.0;

    ClosedPosition {
        position,
        exit_price,
        reason,
        pnl,
        pnl_percent,
        commission,
        net_pnl: pnl - commission,
        closed_at: now,
    }
}
