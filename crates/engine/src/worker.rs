//! Background market worker — poll, detect, validate, trade
//!
//! One loop owns all mutable pipeline state (history, detector,
//! validator, trader). Each cycle fetches a snapshot, runs detection,
//! resolves due validations, settles open positions and finally enters
//! at most one new trade. Every outcome is written to the store before
//! the next cycle; the HTTP API only ever reads the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{Local, Utc};
use persistence::repository::events::{EventsRepository, PumpDumpRecord, WhaleRecord};
use persistence::repository::market::{IndicatorRecord, MarketRepository, SnapshotRecord};
use persistence::repository::signals::{NewSignal, SignalsRepository};
use persistence::repository::trades::{NewTrade, TradeSettlement, TradesRepository};
use persistence::SqlitePool;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::api::MarketDataClient;
use crate::config::BotConfig;
use crate::detector::{whale_direction, EventDetector};
use crate::exchange::{ExchangeClient, LBankClient, PaperExchange};
use crate::history::RollingHistory;
use crate::indicators::IndicatorSnapshot;
use crate::trader::{AutoTrader, QueuedSignal};
use crate::types::{
    PendingPump, PendingSignal, Position, SignalSource, SignalStatus, Ticker, TradeDirection,
};
use crate::validator::SignalValidator;

const ERROR_BACKOFF_SECS: u64 = 10;
const TRADE_QUEUE_LIMIT: i64 = 20;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerStatus {
    Idle,
    Running,
    Error,
}

/// Shared progress/state for the market worker
pub struct WorkerProgress {
    pub status: RwLock<WorkerStatus>,
    pub cancelled: AtomicBool,
    pub cycles: AtomicU64,
    pub whales_detected: AtomicU64,
    pub pumps_detected: AtomicU64,
    pub signals_resolved: AtomicU64,
    pub trades_opened: AtomicU64,
    pub trades_closed: AtomicU64,
    pub error_message: RwLock<Option<String>>,
}

impl WorkerProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(WorkerStatus::Idle),
            cancelled: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            whales_detected: AtomicU64::new(0),
            pumps_detected: AtomicU64::new(0),
            signals_resolved: AtomicU64::new(0),
            trades_opened: AtomicU64::new(0),
            trades_closed: AtomicU64::new(0),
            error_message: RwLock::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.status.read().unwrap(), WorkerStatus::Running)
    }
}

impl Default for WorkerProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Runtime switch for the auto-trader. Detection and validation keep
/// running while trading is off; only order entry is gated.
pub struct TraderControl {
    enabled: AtomicBool,
}

impl TraderControl {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Worker loop
// ---------------------------------------------------------------------------

/// Run the market worker until cancelled. Cycle errors are logged and
/// backed off, never fatal.
pub async fn run_market_worker(
    client: &MarketDataClient,
    progress: &WorkerProgress,
    control: &TraderControl,
    config: &RwLock<BotConfig>,
    db_pool: SqlitePool,
) {
    info!("Market worker starting");
    *progress.status.write().unwrap() = WorkerStatus::Running;

    let exchange = build_exchange(&config.read().unwrap().clone());
    let mut pipeline = Pipeline {
        history: RollingHistory::new(),
        detector: EventDetector::new(),
        validator: SignalValidator::new(),
        // risk counters roll over on the local calendar day
        trader: AutoTrader::new(Local::now().date_naive()),
    };

    if let Err(e) = resume_open_trades(&mut pipeline.trader, &db_pool).await {
        warn!(error = %e, "Failed to resume open trades from store");
    }

    loop {
        if progress.cancelled.load(Ordering::Relaxed) {
            info!("Market worker cancelled");
            break;
        }

        let cfg = config.read().unwrap().clone();
        let sleep_secs = match run_cycle(
            client,
            progress,
            control,
            &cfg,
            exchange.as_ref(),
            &mut pipeline,
            &db_pool,
        )
        .await
        {
            Ok(()) => {
                progress.cycles.fetch_add(1, Ordering::Relaxed);
                *progress.error_message.write().unwrap() = None;
                cfg.update_interval_secs
            }
            Err(e) => {
                error!(error = %e, "Worker cycle failed");
                *progress.error_message.write().unwrap() = Some(e.to_string());
                ERROR_BACKOFF_SECS
            }
        };

        // Sleep in short slices so cancellation stays responsive
        for _ in 0..(sleep_secs * 2) {
            if progress.cancelled.load(Ordering::Relaxed) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
    }

    *progress.status.write().unwrap() = WorkerStatus::Idle;
    info!("Market worker stopped");
}

struct Pipeline {
    history: RollingHistory,
    detector: EventDetector,
    validator: SignalValidator,
    trader: AutoTrader,
}

fn build_exchange(cfg: &BotConfig) -> Box<dyn ExchangeClient> {
    if cfg.exchange == "lbank" && cfg.has_credentials() {
        match LBankClient::new(cfg.api_key.clone(), cfg.secret_key.clone()) {
            Ok(client) => return Box::new(client),
            Err(e) => warn!(error = %e, "Failed to build lbank client, trading paper"),
        }
    } else {
        info!("No exchange credentials configured, trading paper");
    }
    Box::new(PaperExchange::new())
}

/// Reload open trades so a restart keeps monitoring existing positions
async fn resume_open_trades(trader: &mut AutoTrader, pool: &SqlitePool) -> anyhow::Result<()> {
    let repo = TradesRepository::new(pool);
    let open = repo.open_trades().await?;
    let count = open.len();
    for row in open {
        let Some(direction) = TradeDirection::parse(&row.direction) else {
            warn!(trade_id = ?row.id, direction = %row.direction, "Skipping trade with unknown direction");
            continue;
        };
        let Some(trade_id) = row.id else { continue };
        trader.track(Position {
            trade_id,
            signal_id: row.signal_id,
            symbol: row.symbol,
            direction,
            entry_price: row.entry_price,
            amount: row.amount,
            leverage: row.leverage as u32,
            stop_loss: row.stop_loss,
            take_profit: row.take_profit,
            opened_at: chrono::DateTime::from_timestamp(row.opened_at, 0).unwrap_or_else(Utc::now),
        });
    }
    if count > 0 {
        info!(count, "Resumed open trades from store");
    }
    Ok(())
}

async fn run_cycle(
    client: &MarketDataClient,
    progress: &WorkerProgress,
    control: &TraderControl,
    cfg: &BotConfig,
    exchange: &dyn ExchangeClient,
    pipeline: &mut Pipeline,
    pool: &SqlitePool,
) -> anyhow::Result<()> {
    let db = Repos::new(pool);
    let tickers = client.fetch(cfg.api_source).await?;
    let now = Utc::now();
    let ts = now.timestamp();

    let mut prices: HashMap<String, f64> = HashMap::with_capacity(tickers.len());

    for ticker in &tickers {
        prices.insert(ticker.symbol.clone(), ticker.price);
        pipeline.history.push(&ticker.symbol, ticker.price, ticker.volume, now);
        db.market.insert_snapshot(&snapshot_row(ticker, ts)).await?;

        let batch = pipeline.detector.detect(ticker, cfg);

        for whale in &batch.whales {
            progress.whales_detected.fetch_add(1, Ordering::Relaxed);
            info!(
                symbol = %whale.symbol,
                volume = whale.volume,
                side = whale.side.as_str(),
                confidence = whale.confidence,
                "Whale activity detected"
            );
            db.events
                .insert_whale(&WhaleRecord {
                    id: None,
                    symbol: whale.symbol.clone(),
                    price: whale.price,
                    volume: whale.volume,
                    change_percent: whale.change_percent,
                    side: whale.side.as_str().to_string(),
                    confidence: whale.confidence,
                    pattern: whale.pattern.map(|p| p.as_str().to_string()),
                    timestamp: ts,
                })
                .await?;

            let snapshot = IndicatorSnapshot::compute(
                &pipeline.history.prices(&whale.symbol),
                &pipeline.history.volumes(&whale.symbol),
                cfg,
            );
            db.market
                .insert_indicators(&indicator_row(&whale.symbol, &snapshot, ts))
                .await?;

            let direction = whale_direction(whale);
            let signal_id = db
                .signals
                .insert(&NewSignal {
                    symbol: &whale.symbol,
                    direction: direction.as_str(),
                    entry_price: whale.price,
                    source: SignalSource::Whale.as_str(),
                    status: SignalStatus::Pending.as_str(),
                    score: 0,
                    created_at: ts,
                })
                .await?;
            pipeline.validator.register_signal(PendingSignal::new(
                signal_id,
                whale.symbol.clone(),
                direction,
                whale.price,
                now,
            ));
        }

        for pump in &batch.pump_dumps {
            progress.pumps_detected.fetch_add(1, Ordering::Relaxed);
            info!(
                symbol = %pump.symbol,
                kind = pump.kind.as_str(),
                change = pump.change_percent,
                "Rapid move detected"
            );
            let pump_id = db
                .events
                .insert_pump_dump(&PumpDumpRecord {
                    id: None,
                    symbol: pump.symbol.clone(),
                    kind: pump.kind.as_str().to_string(),
                    price_before: pump.price_before,
                    price_after: pump.price_after,
                    change_percent: pump.change_percent,
                    volume: pump.volume,
                    is_valid: None,
                    validation_price: None,
                    score: None,
                    timestamp: ts,
                })
                .await?;
            pipeline.validator.register_pump(PendingPump {
                id: pump_id,
                symbol: pump.symbol.clone(),
                kind: pump.kind,
                entry_price: pump.price_after,
                created_at: now,
            });
        }
    }

    // Timed validation stages. In-memory state is confirmed only after
    // the corresponding write lands; a failed write re-emits next cycle.
    let validation = pipeline.validator.check_signals(now, &prices, cfg);
    for update in &validation.stage_updates {
        let stages_json = serde_json::to_string(&update.stages)?;
        db.signals.update_stages(update.signal_id, &stages_json).await?;
    }
    for verdict in &validation.verdicts {
        let stages_json = serde_json::to_string(&verdict.stages)?;
        db.signals
            .finalize(
                verdict.signal_id,
                verdict.status.as_str(),
                verdict.score as i64,
                &stages_json,
                ts,
            )
            .await?;
        pipeline.validator.resolve_signal(verdict.signal_id);
        progress.signals_resolved.fetch_add(1, Ordering::Relaxed);
        info!(
            signal_id = verdict.signal_id,
            status = verdict.status.as_str(),
            score = verdict.score,
            "Signal resolved"
        );
    }

    // Pump/dump one-shot validations
    for verdict in pipeline.validator.check_pumps(now, &prices, cfg) {
        db.events
            .record_pump_validation(
                verdict.pump_id,
                verdict.is_valid,
                verdict.validation_price,
                verdict.score as i64,
            )
            .await?;
        if let Some(synth) = &verdict.synthesized {
            let signal_id = db
                .signals
                .insert(&NewSignal {
                    symbol: &synth.symbol,
                    direction: synth.direction.as_str(),
                    entry_price: synth.entry_price,
                    source: SignalSource::PumpDump.as_str(),
                    status: SignalStatus::Valid.as_str(),
                    score: synth.score as i64,
                    created_at: ts,
                })
                .await?;
            info!(
                signal_id,
                symbol = %synth.symbol,
                score = synth.score,
                "Validated pump entered the trade queue"
            );
        }
        pipeline.validator.resolve_pump(verdict.pump_id);
    }

    // Settle open positions
    for closed in pipeline.trader.check_open_positions(&prices, now, cfg) {
        db.trades
            .close(
                closed.position.trade_id,
                &TradeSettlement {
                    exit_price: closed.exit_price,
                    close_reason: closed.reason.as_str(),
                    pnl: closed.pnl,
                    pnl_percent: closed.pnl_percent,
                    commission: closed.commission,
                    net_pnl: closed.net_pnl,
                    closed_at: ts,
                },
            )
            .await?;
        pipeline.trader.confirm_close(&closed);
        progress.trades_closed.fetch_add(1, Ordering::Relaxed);
        info!(
            symbol = %closed.position.symbol,
            reason = closed.reason.as_str(),
            net_pnl = closed.net_pnl,
            "Trade closed"
        );
    }

    // Enter at most one new trade per cycle; the risk counters roll
    // over on the local calendar day
    if control.is_enabled() {
        maybe_open_trade(
            progress,
            cfg,
            exchange,
            pipeline,
            &db,
            Local::now().date_naive(),
            ts,
        )
        .await?;
    }

    Ok(())
}

async fn maybe_open_trade(
    progress: &WorkerProgress,
    cfg: &BotConfig,
    exchange: &dyn ExchangeClient,
    pipeline: &mut Pipeline,
    db: &Repos<'_>,
    today: chrono::NaiveDate,
    ts: i64,
) -> anyhow::Result<()> {
    if let Err(refusal) = pipeline.trader.can_trade(today, cfg) {
        tracing::debug!(?refusal, "Risk gate closed");
        return Ok(());
    }

    let queue = db
        .signals
        .trade_queue(cfg.min_score_for_trade as i64, TRADE_QUEUE_LIMIT)
        .await?;
    let Some(candidate) = queue.into_iter().find_map(|row| {
        let id = row.id?;
        if pipeline.trader.already_traded(id) {
            return None;
        }
        Some(QueuedSignal {
            id,
            symbol: row.symbol,
            direction: TradeDirection::parse(&row.direction)?,
            entry_price: row.entry_price,
            score: row.score as u32,
        })
    }) else {
        return Ok(());
    };

    match pipeline.trader.execute(&candidate, cfg, exchange).await {
        Ok(opened) => {
            // The exchange order is live at this point. If the row
            // cannot be written the position is still tracked, under a
            // synthetic negative id, so stop-loss/take-profit
            // monitoring never drops a live order.
            let insert = db
                .trades
                .insert_open(&NewTrade {
                    signal_id: opened.signal_id,
                    symbol: &opened.symbol,
                    direction: opened.direction.as_str(),
                    entry_price: opened.entry_price,
                    amount: opened.amount,
                    leverage: opened.leverage as i64,
                    stop_loss: opened.stop_loss,
                    take_profit: opened.take_profit,
                    commission: opened.entry_commission,
                    opened_at: ts,
                })
                .await;
            let trade_id = match insert {
                Ok(id) => id,
                Err(e) => {
                    error!(
                        signal_id = opened.signal_id,
                        error = %e,
                        "Failed to persist trade, monitoring in memory only"
                    );
                    -opened.signal_id
                }
            };
            pipeline.trader.track(Position {
                trade_id,
                signal_id: opened.signal_id,
                symbol: opened.symbol,
                direction: opened.direction,
                entry_price: opened.entry_price,
                amount: opened.amount,
                leverage: opened.leverage,
                stop_loss: opened.stop_loss,
                take_profit: opened.take_profit,
                opened_at: Utc::now(),
            });
            progress.trades_opened.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            // the signal stays queued and is retried next cycle
            warn!(signal_id = candidate.id, error = %e, "Order rejected");
        }
    }
    Ok(())
}

struct Repos<'a> {
    events: EventsRepository<'a>,
    signals: SignalsRepository<'a>,
    trades: TradesRepository<'a>,
    market: MarketRepository<'a>,
}

impl<'a> Repos<'a> {
    fn new(pool: &'a SqlitePool) -> Self {
        Self {
            events: EventsRepository::new(pool),
            signals: SignalsRepository::new(pool),
            trades: TradesRepository::new(pool),
            market: MarketRepository::new(pool),
        }
    }
}

fn snapshot_row(ticker: &Ticker, ts: i64) -> SnapshotRecord {
    SnapshotRecord {
        id: None,
        symbol: ticker.symbol.clone(),
        price: ticker.price,
        high_24h: ticker.high_24h,
        low_24h: ticker.low_24h,
        volume: ticker.volume,
        change_24h: ticker.change_24h,
        timestamp: ts,
    }
}

fn indicator_row(symbol: &str, snapshot: &IndicatorSnapshot, ts: i64) -> IndicatorRecord {
    IndicatorRecord {
        id: None,
        symbol: symbol.to_string(),
        rsi: snapshot.rsi,
        macd_line: snapshot.macd.map(|m| m.macd_line),
        signal_line: snapshot.macd.map(|m| m.signal_line),
        histogram: snapshot.macd.map(|m| m.histogram),
        ema_20: snapshot.ema_20,
        volume_avg: snapshot.volume_avg,
        timestamp: ts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::Database;

    #[test]
    fn trader_control_toggles() {
        let control = TraderControl::new(false);
        assert!(!control.is_enabled());
        control.enable();
        assert!(control.is_enabled());
        control.disable();
        assert!(!control.is_enabled());
    }

    #[test]
    fn progress_starts_idle() {
        let progress = WorkerProgress::new();
        assert!(!progress.is_running());
        assert_eq!(progress.cycles.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn resume_open_trades_restores_positions() {
        let db = Database::in_memory().await.unwrap();
        db.trades()
            .insert_open(&NewTrade {
                signal_id: 1,
                symbol: "BTC",
                direction: "LONG",
                entry_price: 100.0,
                amount: 5.0,
                leverage: 5,
                stop_loss: 98.0,
                take_profit: 104.0,
                commission: 0.0025,
                opened_at: 1000,
            })
            .await
            .unwrap();

        let mut trader = AutoTrader::new(Utc::now().date_naive());
        resume_open_trades(&mut trader, db.pool()).await.unwrap();
        assert_eq!(trader.counters().open_positions, 1);
    }

    #[tokio::test]
    async fn live_order_is_tracked_when_the_trade_row_cannot_be_written() {
        let db = Database::in_memory().await.unwrap();
        db.signals()
            .insert(&NewSignal {
                symbol: "BTC",
                direction: "LONG",
                entry_price: 100.0,
                source: "whale",
                status: "valid",
                score: 80,
                created_at: 1000,
            })
            .await
            .unwrap();
        // Make the insert fail while the exchange keeps accepting orders
        sqlx::query("DROP TABLE trades")
            .execute(db.pool())
            .await
            .unwrap();

        let progress = WorkerProgress::new();
        let cfg = BotConfig::default();
        let paper = PaperExchange::new();
        let mut pipeline = Pipeline {
            history: RollingHistory::new(),
            detector: EventDetector::new(),
            validator: SignalValidator::new(),
            trader: AutoTrader::new(Local::now().date_naive()),
        };
        let repos = Repos::new(db.pool());

        maybe_open_trade(
            &progress,
            &cfg,
            &paper,
            &mut pipeline,
            &repos,
            Local::now().date_naive(),
            1000,
        )
        .await
        .unwrap();

        assert_eq!(paper.orders().len(), 1);
        assert_eq!(pipeline.trader.counters().open_positions, 1);
        assert_eq!(pipeline.trader.counters().daily_trades, 1);
        assert!(pipeline.trader.already_traded(1));
        assert_eq!(progress.trades_opened.load(Ordering::Relaxed), 1);
    }
}
