//! Core data types for the whale-watch pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single market ticker sample, one per symbol per poll cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub price: f64,
    pub change_24h: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub volume: f64,
}

/// Direction of a trade signal or open position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeDirection {
    Long,
    Short,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Long => "LONG",
            TradeDirection::Short => "SHORT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LONG" => Some(TradeDirection::Long),
            "SHORT" => Some(TradeDirection::Short),
            _ => None,
        }
    }
}

/// Side of a whale trade, inferred from the 24h change direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhaleSide {
    Buy,
    Sell,
}

impl WhaleSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            WhaleSide::Buy => "buy",
            WhaleSide::Sell => "sell",
        }
    }
}

/// Pattern tag attached to a whale event during detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhalePattern {
    /// Whale volume paired with a >5% move since the previous sample
    BaitPecking,
}

impl WhalePattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            WhalePattern::BaitPecking => "bait_pecking",
        }
    }
}

/// A ticker sample whose volume crossed the whale threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleEvent {
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
    pub change_percent: f64,
    pub side: WhaleSide,
    pub confidence: f64,
    pub pattern: Option<WhalePattern>,
}

/// Kind of a rapid single-cycle price move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PumpDumpKind {
    Pump,
    Dump,
}

impl PumpDumpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PumpDumpKind::Pump => "pump",
            PumpDumpKind::Dump => "dump",
        }
    }
}

/// A price move beyond the pump/dump threshold between two consecutive
/// snapshots of the same symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PumpDumpEvent {
    pub symbol: String,
    pub kind: PumpDumpKind,
    pub price_before: f64,
    pub price_after: f64,
    pub change_percent: f64,
    pub volume: f64,
}

/// Where a signal came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Whale,
    PumpDump,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Whale => "whale",
            SignalSource::PumpDump => "pump_dump",
        }
    }
}

/// Lifecycle state of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Pending,
    Valid,
    Invalid,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Pending => "pending",
            SignalStatus::Valid => "valid",
            SignalStatus::Invalid => "invalid",
        }
    }
}

/// Outcome of one timed validation stage. Written exactly once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StageResult {
    pub price: f64,
    pub change_percent: f64,
    pub is_valid: bool,
}

/// Number of timed validation stages per signal
pub const STAGE_COUNT: usize = 3;

/// A trade signal tracked by the validator until terminal resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSignal {
    pub id: i64,
    pub symbol: String,
    pub direction: TradeDirection,
    pub entry_price: f64,
    pub created_at: DateTime<Utc>,
    pub stages: [Option<StageResult>; STAGE_COUNT],
}

impl PendingSignal {
    pub fn new(
        id: i64,
        symbol: String,
        direction: TradeDirection,
        entry_price: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            symbol,
            direction,
            entry_price,
            created_at,
            stages: [None; STAGE_COUNT],
        }
    }

    pub fn valid_stage_count(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| s.map(|r| r.is_valid).unwrap_or(false))
            .count()
    }

    pub fn all_stages_resolved(&self) -> bool {
        self.stages.iter().all(|s| s.is_some())
    }
}

/// A pump/dump event awaiting its single timed validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPump {
    pub id: i64,
    pub symbol: String,
    pub kind: PumpDumpKind,
    pub entry_price: f64,
    pub created_at: DateTime<Utc>,
}

/// Why an open position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TakeProfit => "take_profit",
        }
    }
}

/// An open leveraged position monitored to a stop-loss/take-profit exit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub trade_id: i64,
    pub signal_id: i64,
    pub symbol: String,
    pub direction: TradeDirection,
    pub entry_price: f64,
    pub amount: f64,
    pub leverage: u32,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub opened_at: DateTime<Utc>,
}

/// A closed position with its realized PnL accounting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub position: Position,
    pub exit_price: f64,
    pub reason: CloseReason,
    pub pnl: f64,
    pub pnl_percent: f64,
    pub commission: f64,
    pub net_pnl: f64,
    pub closed_at: DateTime<Utc>,
}
