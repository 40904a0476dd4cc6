//! Runtime configuration for the detection and trading pipeline

use serde::{Deserialize, Serialize};

/// Which public market data API to poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiSource {
    Coingecko,
    Kucoin,
    Bybit,
}

impl ApiSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiSource::Coingecko => "coingecko",
            ApiSource::Kucoin => "kucoin",
            ApiSource::Bybit => "bybit",
        }
    }
}

/// Full pipeline configuration. Every field has a working default so a
/// bare start trades paper with public data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Market data source to poll
    pub api_source: ApiSource,
    /// Seconds between poll cycles
    pub update_interval_secs: u64,

    /// 24h quote volume above which a sample counts as whale activity
    pub whale_threshold: f64,
    /// Absolute percent move between consecutive samples that flags a pump/dump
    pub pump_dump_threshold: f64,
    /// Minutes to wait before validating a pump/dump event
    pub pump_dump_time_mins: f64,
    /// Score granted to a pump/dump event that validates
    pub pump_dump_weight: u32,

    /// Minutes after signal creation at which each validation stage runs
    pub validation_times_mins: [f64; 3],
    /// Score contribution of each validation stage
    pub validation_weights: [u32; 3],
    /// Minimum percent move for a validation stage to pass
    pub min_price_change: f64,

    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,

    /// Margin per trade in quote currency
    pub trade_amount: f64,
    pub leverage: u32,
    /// Stop loss distance from entry, percent
    pub stop_loss_percent: f64,
    /// Take profit distance from entry, percent
    pub take_profit_percent: f64,
    /// Commission per side, percent of margin
    pub commission_percent: f64,
    pub max_daily_trades: u32,
    pub max_consecutive_losses: u32,
    pub min_score_for_trade: u32,

    /// Exchange identifier; anything but "lbank" trades paper
    pub exchange: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            api_source: ApiSource::Coingecko,
            update_interval_secs: 2,
            whale_threshold: 500_000.0,
            pump_dump_threshold: 3.0,
            pump_dump_time_mins: 1.0,
            pump_dump_weight: 80,
            validation_times_mins: [1.0, 2.0, 4.0],
            validation_weights: [20, 30, 50],
            min_price_change: 0.1,
            rsi_period: 14,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            trade_amount: 5.0,
            leverage: 5,
            stop_loss_percent: 2.0,
            take_profit_percent: 4.0,
            commission_percent: 0.05,
            max_daily_trades: 4,
            max_consecutive_losses: 4,
            min_score_for_trade: 70,
            exchange: "lbank".to_string(),
            api_key: String::new(),
            secret_key: String::new(),
        }
    }
}

impl BotConfig {
    /// True when real exchange credentials are present
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.secret_key.is_empty()
    }

    /// Load from a JSON file, falling back to defaults when absent
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}
