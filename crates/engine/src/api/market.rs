//! Public market data clients (no authentication required)
//!
//! One fetch per poll cycle against the configured source. All three
//! sources are normalised to the same USDT-quoted `Ticker` shape and
//! deduplicated per symbol keeping the higher-volume row.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::ApiSource;
use crate::types::Ticker;

const COINGECKO_URL: &str =
    "https://api.coingecko.com/api/v3/coins/markets?vs_currency=usd&order=volume_desc&per_page=50&page=1";
const KUCOIN_URL: &str = "https://api.kucoin.com/api/v1/market/allTickers";
const BYBIT_URL: &str = "https://api.bybit.com/v5/market/tickers?category=spot";

/// Cap on USDT pairs taken from the exchange-wide ticker endpoints
const MAX_PAIRS: usize = 100;

/// Market data client polling one configured public source
#[derive(Clone)]
pub struct MarketDataClient {
    client: Client,
}

// ============================================================================
// Raw response shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct CoingeckoMarket {
    symbol: String,
    current_price: Option<f64>,
    price_change_percentage_24h: Option<f64>,
    high_24h: Option<f64>,
    low_24h: Option<f64>,
    total_volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct KucoinResponse {
    data: KucoinData,
}

#[derive(Debug, Deserialize)]
struct KucoinData {
    ticker: Vec<KucoinTicker>,
}

#[derive(Debug, Deserialize)]
struct KucoinTicker {
    symbol: String,
    last: Option<String>,
    #[serde(rename = "changeRate")]
    change_rate: Option<String>,
    high: Option<String>,
    low: Option<String>,
    #[serde(rename = "volValue")]
    vol_value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BybitResponse {
    result: BybitResult,
}

#[derive(Debug, Deserialize)]
struct BybitResult {
    list: Vec<BybitTicker>,
}

#[derive(Debug, Deserialize)]
struct BybitTicker {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "price24hPcnt")]
    price_24h_pcnt: String,
    #[serde(rename = "highPrice24h")]
    high_price_24h: String,
    #[serde(rename = "lowPrice24h")]
    low_price_24h: String,
    #[serde(rename = "turnover24h")]
    turnover_24h: String,
}

impl Default for MarketDataClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketDataClient {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Fetch one snapshot from the configured source
    pub async fn fetch(&self, source: ApiSource) -> Result<Vec<Ticker>> {
        let tickers = match source {
            ApiSource::Coingecko => self.fetch_coingecko().await?,
            ApiSource::Kucoin => self.fetch_kucoin().await?,
            ApiSource::Bybit => self.fetch_bybit().await?,
        };
        let tickers = dedup_by_volume(tickers);
        debug!(source = source.as_str(), count = tickers.len(), "fetched tickers");
        Ok(tickers)
    }

    async fn fetch_coingecko(&self) -> Result<Vec<Ticker>> {
        let resp = self
            .client
            .get(COINGECKO_URL)
            .send()
            .await
            .context("coingecko request failed")?;
        if !resp.status().is_success() {
            bail!("coingecko returned status {}", resp.status());
        }
        let markets: Vec<CoingeckoMarket> = resp.json().await?;
        Ok(markets.into_iter().filter_map(coingecko_to_ticker).collect())
    }

    async fn fetch_kucoin(&self) -> Result<Vec<Ticker>> {
        let resp = self
            .client
            .get(KUCOIN_URL)
            .send()
            .await
            .context("kucoin request failed")?;
        if !resp.status().is_success() {
            bail!("kucoin returned status {}", resp.status());
        }
        let body: KucoinResponse = resp.json().await?;
        Ok(body
            .data
            .ticker
            .into_iter()
            .filter_map(|t| {
                let base = t.symbol.strip_suffix("-USDT")?;
                Some(Ticker {
                    symbol: base.to_string(),
                    price: parse_f64(t.last.as_deref())?,
                    change_24h: parse_f64(t.change_rate.as_deref()).unwrap_or(0.0) * 100.0,
                    high_24h: parse_f64(t.high.as_deref()).unwrap_or(0.0),
                    low_24h: parse_f64(t.low.as_deref()).unwrap_or(0.0),
                    volume: parse_f64(t.vol_value.as_deref()).unwrap_or(0.0),
                })
            })
            .take(MAX_PAIRS)
            .collect())
    }

    async fn fetch_bybit(&self) -> Result<Vec<Ticker>> {
        let resp = self
            .client
            .get(BYBIT_URL)
            .send()
            .await
            .context("bybit request failed")?;
        if !resp.status().is_success() {
            bail!("bybit returned status {}", resp.status());
        }
        let body: BybitResponse = resp.json().await?;
        Ok(body
            .result
            .list
            .into_iter()
            .filter_map(|t| {
                let base = t.symbol.strip_suffix("USDT")?;
                Some(Ticker {
                    symbol: base.to_string(),
                    price: t.last_price.parse().ok()?,
                    change_24h: t.price_24h_pcnt.parse::<f64>().unwrap_or(0.0) * 100.0,
                    high_24h: t.high_price_24h.parse().unwrap_or(0.0),
                    low_24h: t.low_price_24h.parse().unwrap_or(0.0),
                    volume: t.turnover_24h.parse().unwrap_or(0.0),
                })
            })
            .take(MAX_PAIRS)
            .collect())
    }
}

fn parse_f64(s: Option<&str>) -> Option<f64> {
    s?.parse().ok()
}

/// Rows with no price are dropped; other missing fields default to zero
fn coingecko_to_ticker(m: CoingeckoMarket) -> Option<Ticker> {
    Some(Ticker {
        symbol: m.symbol.to_uppercase(),
        price: m.current_price?,
        change_24h: m.price_change_percentage_24h.unwrap_or(0.0),
        high_24h: m.high_24h.unwrap_or(0.0),
        low_24h: m.low_24h.unwrap_or(0.0),
        volume: m.total_volume.unwrap_or(0.0),
    })
}

/// Collapse duplicate symbols, keeping whichever row reports more volume
fn dedup_by_volume(tickers: Vec<Ticker>) -> Vec<Ticker> {
    let mut by_symbol: HashMap<String, Ticker> = HashMap::new();
    for t in tickers {
        match by_symbol.get(&t.symbol) {
            Some(existing) if existing.volume >= t.volume => {}
            _ => {
                by_symbol.insert(t.symbol.clone(), t);
            }
        }
    }
    by_symbol.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str, volume: f64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            price: 1.0,
            change_24h: 0.0,
            high_24h: 1.0,
            low_24h: 1.0,
            volume,
        }
    }

    #[test]
    fn dedup_keeps_the_higher_volume_row() {
        let out = dedup_by_volume(vec![
            ticker("BTC", 100.0),
            ticker("BTC", 500.0),
            ticker("ETH", 50.0),
            ticker("BTC", 200.0),
        ]);
        assert_eq!(out.len(), 2);
        let btc = out.iter().find(|t| t.symbol == "BTC").unwrap();
        assert_eq!(btc.volume, 500.0);
    }

    #[test]
    fn coingecko_rows_normalise_to_uppercase_tickers() {
        let raw = r#"[{"symbol":"btc","current_price":50000.0,
            "price_change_percentage_24h":2.5,"high_24h":51000.0,
            "low_24h":49000.0,"total_volume":1000000.0},
            {"symbol":"eth","current_price":null,
            "price_change_percentage_24h":null,"high_24h":null,
            "low_24h":null,"total_volume":null}]"#;
        let markets: Vec<CoingeckoMarket> = serde_json::from_str(raw).unwrap();
        let tickers: Vec<Ticker> = markets.into_iter().filter_map(coingecko_to_ticker).collect();
        // null price rows are dropped entirely
        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers[0].symbol, "BTC");
        assert_eq!(tickers[0].volume, 1_000_000.0);
    }

    #[test]
    fn kucoin_pairs_filter_to_usdt_and_scale_change_rate() {
        let raw = r#"{"data":{"ticker":[
            {"symbol":"BTC-USDT","last":"50000","changeRate":"0.025",
             "high":"51000","low":"49000","volValue":"1000000"},
            {"symbol":"BTC-BTC","last":"1","changeRate":"0",
             "high":"1","low":"1","volValue":"1"}]}}"#;
        let body: KucoinResponse = serde_json::from_str(raw).unwrap();
        let tickers: Vec<_> = body
            .data
            .ticker
            .into_iter()
            .filter_map(|t| {
                let base = t.symbol.strip_suffix("-USDT")?;
                Some((base.to_string(), parse_f64(t.change_rate.as_deref())? * 100.0))
            })
            .collect();
        assert_eq!(tickers.len(), 1);
        assert_eq!(tickers[0].0, "BTC");
        assert!((tickers[0].1 - 2.5).abs() < 1e-9);
    }

    #[test]
    fn bybit_percent_is_scaled_from_fraction() {
        let raw = r#"{"result":{"list":[
            {"symbol":"ETHUSDT","lastPrice":"3000","price24hPcnt":"-0.031",
             "highPrice24h":"3100","lowPrice24h":"2900","turnover24h":"500000"}]}}"#;
        let body: BybitResponse = serde_json::from_str(raw).unwrap();
        let t = &body.result.list[0];
        assert_eq!(t.symbol.strip_suffix("USDT"), Some("ETH"));
        assert!((t.price_24h_pcnt.parse::<f64>().unwrap() * 100.0 + 3.1).abs() < 1e-9);
    }
}
