//! Bounded per-symbol price history backing the indicator calculations

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

/// Samples kept per symbol before the oldest is evicted
pub const HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct PricePoint {
    pub price: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

/// Fixed-capacity rolling history of price samples per symbol.
/// Insertion order is poll order; eviction is strictly FIFO.
#[derive(Debug, Default)]
pub struct RollingHistory {
    series: HashMap<String, VecDeque<PricePoint>>,
}

impl RollingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, symbol: &str, price: f64, volume: f64, timestamp: DateTime<Utc>) {
        let buf = self.series.entry(symbol.to_string()).or_default();
        if buf.len() == HISTORY_CAPACITY {
            buf.pop_front();
        }
        buf.push_back(PricePoint {
            price,
            volume,
            timestamp,
        });
    }

    /// Prices oldest-first. Empty when the symbol was never sampled.
    pub fn prices(&self, symbol: &str) -> Vec<f64> {
        self.series
            .get(symbol)
            .map(|buf| buf.iter().map(|p| p.price).collect())
            .unwrap_or_default()
    }

    /// Volumes oldest-first, aligned with `prices`
    pub fn volumes(&self, symbol: &str) -> Vec<f64> {
        self.series
            .get(symbol)
            .map(|buf| buf.iter().map(|p| p.volume).collect())
            .unwrap_or_default()
    }

    pub fn len(&self, symbol: &str) -> usize {
        self.series.get(symbol).map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, symbol: &str) -> bool {
        self.len(symbol) == 0
    }

    pub fn latest(&self, symbol: &str) -> Option<PricePoint> {
        self.series.get(symbol).and_then(|b| b.back().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut h = RollingHistory::new();
        for i in 0..(HISTORY_CAPACITY + 10) {
            h.push("BTC", i as f64, 1000.0, Utc::now());
        }
        let prices = h.prices("BTC");
        assert_eq!(prices.len(), HISTORY_CAPACITY);
        assert_eq!(prices[0], 10.0);
        assert_eq!(*prices.last().unwrap(), (HISTORY_CAPACITY + 9) as f64);
    }

    #[test]
    fn symbols_are_independent() {
        let mut h = RollingHistory::new();
        h.push("BTC", 50_000.0, 1e6, Utc::now());
        h.push("ETH", 3_000.0, 5e5, Utc::now());
        assert_eq!(h.len("BTC"), 1);
        assert_eq!(h.len("ETH"), 1);
        assert!(h.prices("SOL").is_empty());
    }

    #[test]
    fn latest_returns_last_push() {
        let mut h = RollingHistory::new();
        h.push("BTC", 1.0, 10.0, Utc::now());
        h.push("BTC", 2.0, 20.0, Utc::now());
        let last = h.latest("BTC").unwrap();
        assert_eq!(last.price, 2.0);
        assert_eq!(last.volume, 20.0);
    }
}
