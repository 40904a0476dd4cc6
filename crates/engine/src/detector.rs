//! Event detection over per-cycle market snapshots
//!
//! Stateful across cycles only through the previous-price map; every
//! detected event is returned to the caller for persistence and signal
//! registration, never written here.

use std::collections::HashMap;

use crate::config::BotConfig;
use crate::types::{
    PumpDumpEvent, PumpDumpKind, Ticker, TradeDirection, WhaleEvent, WhalePattern, WhaleSide,
};

/// Percent move since the previous sample that marks a whale event as
/// bait pecking
const BAIT_PECKING_MOVE: f64 = 5.0;

/// Everything one snapshot produced
#[derive(Debug, Default)]
pub struct DetectionBatch {
    pub whales: Vec<WhaleEvent>,
    pub pump_dumps: Vec<PumpDumpEvent>,
}

/// Detects whale activity and pump/dump moves from consecutive snapshots
/// of each symbol
#[derive(Debug, Default)]
pub struct EventDetector {
    previous_prices: HashMap<String, f64>,
}

impl EventDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Examine one ticker against the previous cycle's price.
    /// The previous price is updated unconditionally, so a symbol can
    /// produce at most one pump/dump event per actual move.
    pub fn detect(&mut self, ticker: &Ticker, cfg: &BotConfig) -> DetectionBatch {
        let mut batch = DetectionBatch::default();
        let prev = self.previous_prices.get(ticker.symbol.as_str()).copied();

        if ticker.volume >= cfg.whale_threshold {
            batch.whales.push(self.whale_event(ticker, cfg, prev));
        }

        if let Some(prev_price) = prev {
            if prev_price > 0.0 {
                let quick_change = (ticker.price - prev_price) / prev_price * 100.0;
                if quick_change.abs() >= cfg.pump_dump_threshold {
                    let kind = if quick_change > 0.0 {
                        PumpDumpKind::Pump
                    } else {
                        PumpDumpKind::Dump
                    };
                    batch.pump_dumps.push(PumpDumpEvent {
                        symbol: ticker.symbol.clone(),
                        kind,
                        price_before: prev_price,
                        price_after: ticker.price,
                        change_percent: quick_change,
                        volume: ticker.volume,
                    });
                }
            }
        }

        self.previous_prices
            .insert(ticker.symbol.clone(), ticker.price);
        batch
    }

    fn whale_event(&self, ticker: &Ticker, cfg: &BotConfig, prev: Option<f64>) -> WhaleEvent {
        let side = if ticker.change_24h > 0.0 {
            WhaleSide::Buy
        } else {
            WhaleSide::Sell
        };
        let confidence =
            (ticker.volume / cfg.whale_threshold * 50.0 + ticker.change_24h.abs() * 5.0).min(100.0);

        let pattern = prev.and_then(|prev_price| {
            if prev_price > 0.0
                && ((ticker.price - prev_price) / prev_price * 100.0).abs() > BAIT_PECKING_MOVE
            {
                Some(WhalePattern::BaitPecking)
            } else {
                None
            }
        });

        WhaleEvent {
            symbol: ticker.symbol.clone(),
            price: ticker.price,
            volume: ticker.volume,
            change_percent: ticker.change_24h,
            side,
            confidence,
            pattern,
        }
    }
}

/// Signal direction implied by a whale event
pub fn whale_direction(event: &WhaleEvent) -> TradeDirection {
    match event.side {
        WhaleSide::Buy => TradeDirection::Long,
        WhaleSide::Sell => TradeDirection::Short,
    }
}
