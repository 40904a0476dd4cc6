//! Momentum indicators computed over the rolling price history
//!
//! Deliberately simplified implementations: RSI uses trailing-period
//! average gains/losses over the last `period + 1` prices, and the MACD
//! signal line is a fixed fraction of the MACD line rather than an EMA
//! of its history. Outputs are rounded so persisted rows are stable.

use serde::{Deserialize, Serialize};

use crate::config::BotConfig;

// ============================================================================
// RSI
// ============================================================================

/// Relative Strength Index over the trailing `period + 1` prices.
/// Returns None until enough history has accumulated.
/// All-gain windows read 100; values are rounded to 2 decimals.
pub fn rsi(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period + 1 {
        return None;
    }
    let window = &prices[prices.len() - (period + 1)..];

    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in window.windows(2) {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            gains += delta;
        } else {
            losses += -delta;
        }
    }
    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    let value = if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };
    Some(round_to(value, 2))
}

// ============================================================================
// MACD
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Macd {
    pub macd_line: f64,
    pub signal_line: f64,
    pub histogram: f64,
}

/// MACD over the trailing slow-period prices. The fast and slow EMAs are
/// seeded with the first value of their slice and run forward; the signal
/// line is macd_line * 0.9 since no MACD series is retained between
/// cycles. Rounded to 4 decimals.
pub fn macd(prices: &[f64], fast: usize, slow: usize, _signal: usize) -> Option<Macd> {
    if prices.len() < slow {
        return None;
    }
    let ema_fast = seeded_ema(&prices[prices.len() - fast..], fast);
    let ema_slow = seeded_ema(&prices[prices.len() - slow..], slow);

    let macd_line = ema_fast - ema_slow;
    let signal_line = macd_line * 0.9;
    Some(Macd {
        macd_line: round_to(macd_line, 4),
        signal_line: round_to(signal_line, 4),
        histogram: round_to(macd_line - signal_line, 4),
    })
}

/// EMA over the trailing `period` prices, seeded with the slice's first
/// value. None until enough history has accumulated.
pub fn ema(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period {
        return None;
    }
    Some(round_to(
        seeded_ema(&prices[prices.len() - period..], period),
        4,
    ))
}

/// Running EMA seeded with the slice's first value
fn seeded_ema(values: &[f64], period: usize) -> f64 {
    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = values[0];
    for &v in &values[1..] {
        ema = (v - ema) * multiplier + ema;
    }
    ema
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

// ============================================================================
// Snapshot
// ============================================================================

/// Periods for the auxiliary snapshot values
const EMA_SNAPSHOT_PERIOD: usize = 20;

/// Indicator values captured alongside a detection event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub rsi: Option<f64>,
    pub macd: Option<Macd>,
    pub ema_20: Option<f64>,
    pub volume_avg: Option<f64>,
}

impl IndicatorSnapshot {
    pub fn compute(prices: &[f64], volumes: &[f64], cfg: &BotConfig) -> Self {
        let volume_avg = if volumes.is_empty() {
            None
        } else {
            Some(round_to(
                volumes.iter().sum::<f64>() / volumes.len() as f64,
                2,
            ))
        };
        Self {
            rsi: rsi(prices, cfg.rsi_period),
            macd: macd(prices, cfg.macd_fast, cfg.macd_slow, cfg.macd_signal),
            ema_20: ema(prices, EMA_SNAPSHOT_PERIOD),
            volume_avg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(start: f64, step: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| start + step * i as f64).collect()
    }

    #[test]
    fn rsi_needs_period_plus_one_prices() {
        let prices = ramp(100.0, 1.0, 14);
        assert!(rsi(&prices, 14).is_none());
        let prices = ramp(100.0, 1.0, 15);
        assert!(rsi(&prices, 14).is_some());
    }

    #[test]
    fn rsi_is_100_when_only_gains() {
        let prices = ramp(100.0, 1.0, 15);
        assert_eq!(rsi(&prices, 14), Some(100.0));
    }

    #[test]
    fn rsi_is_low_when_only_losses() {
        let prices = ramp(100.0, -1.0, 15);
        let v = rsi(&prices, 14).unwrap();
        assert!(v < 1.0, "all-loss window should read near 0, got {v}");
    }

    #[test]
    fn rsi_balanced_moves_read_50() {
        // alternating +1/-1 gives equal average gain and loss
        let mut prices = vec![100.0];
        for i in 0..14 {
            let last = *prices.last().unwrap();
            prices.push(if i % 2 == 0 { last + 1.0 } else { last - 1.0 });
        }
        assert_eq!(rsi(&prices, 14), Some(50.0));
    }

    #[test]
    fn macd_needs_slow_period_prices() {
        let prices = ramp(100.0, 0.5, 25);
        assert!(macd(&prices, 12, 26, 9).is_none());
        let prices = ramp(100.0, 0.5, 26);
        assert!(macd(&prices, 12, 26, 9).is_some());
    }

    #[test]
    fn macd_positive_in_uptrend() {
        let prices = ramp(100.0, 2.0, 40);
        let m = macd(&prices, 12, 26, 9).unwrap();
        assert!(m.macd_line > 0.0);
        assert!((m.signal_line - m.macd_line * 0.9).abs() < 1e-3);
        assert!((m.histogram - m.macd_line * 0.1).abs() < 1e-3);
    }

    #[test]
    fn macd_zero_on_flat_prices() {
        let prices = vec![100.0; 30];
        let m = macd(&prices, 12, 26, 9).unwrap();
        assert_eq!(m.macd_line, 0.0);
        assert_eq!(m.signal_line, 0.0);
        assert_eq!(m.histogram, 0.0);
    }

    #[test]
    fn ema_needs_its_full_period() {
        let prices = ramp(100.0, 1.0, 19);
        assert!(ema(&prices, 20).is_none());
        let prices = ramp(100.0, 1.0, 20);
        assert!(ema(&prices, 20).is_some());
    }

    #[test]
    fn snapshot_fills_what_the_history_allows() {
        let cfg = BotConfig::default();
        let prices = ramp(100.0, 1.0, 20);
        let volumes = vec![10.0, 20.0, 30.0];
        let snap = IndicatorSnapshot::compute(&prices, &volumes, &cfg);
        assert!(snap.rsi.is_some());
        // 20 prices is short of the 26-period MACD window
        assert!(snap.macd.is_none());
        assert!(snap.ema_20.is_some());
        assert_eq!(snap.volume_avg, Some(20.0));
    }
}
