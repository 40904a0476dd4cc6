//! Whale Watch Engine — event detection, signal validation, auto-trading
//!
//! Provides:
//! - Whale activity and pump/dump detection over polled market snapshots
//! - Three-stage timed signal validation with weighted scoring
//! - Risk-gated auto-trader with stop-loss/take-profit monitoring
//! - Public market data clients (CoinGecko, KuCoin, Bybit) and an
//!   LBank order client

pub mod api;
pub mod config;
pub mod detector;
pub mod exchange;
pub mod history;
pub mod indicators;
pub mod trader;
pub mod types;
pub mod validator;
pub mod worker;

// Re-exports for convenience
pub use api::MarketDataClient;
pub use config::{ApiSource, BotConfig};
pub use detector::{DetectionBatch, EventDetector};
pub use exchange::{ExchangeClient, LBankClient, PaperExchange};
pub use history::RollingHistory;
pub use indicators::{macd, rsi, IndicatorSnapshot, Macd};
pub use trader::{AutoTrader, QueuedSignal, TradeRefusal, TraderCounters};
pub use types::*;
pub use validator::{PumpVerdict, SignalValidator, SignalVerdict, StageUpdate, ValidationOutput};
pub use worker::{run_market_worker, TraderControl, WorkerProgress, WorkerStatus};
