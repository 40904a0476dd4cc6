//! Order execution backends
//!
//! `ExchangeClient` is the seam between the trader and the outside
//! world. `LBankClient` signs and submits real market orders;
//! `PaperExchange` accepts everything and records it, and doubles as
//! the test double.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info};

use crate::types::TradeDirection;

type HmacSha256 = Hmac<Sha256>;

/// Exchange acknowledgement of a submitted order
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: Option<String>,
}

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn name(&self) -> &str;

    /// Submit a market order. `amount` is in quote currency.
    async fn create_order(
        &self,
        symbol: &str,
        direction: TradeDirection,
        amount: f64,
    ) -> Result<OrderAck>;
}

// ============================================================================
// LBank
// ============================================================================

const LBANK_BASE_URL: &str = "https://api.lbkex.com";
const REQUEST_TIMEOUT_SECS: u64 = 5;

pub struct LBankClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct LBankOrderResponse {
    result: serde_json::Value,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
}

impl LBankClient {
    pub fn new(api_key: String, secret_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build lbank http client")?;
        Ok(Self {
            client,
            base_url: LBANK_BASE_URL.to_string(),
            api_key,
            secret_key,
        })
    }

    /// Sort params by key, join as k=v&k=v and HMAC-SHA256 the string
    /// with the secret. The hex digest is sent uppercase.
    fn sign(&self, params: &BTreeMap<String, String>) -> Result<String> {
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|_| anyhow!("invalid lbank secret key"))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()).to_uppercase())
    }

    /// LBank pairs are lowercase with a _usdt suffix
    fn pair(symbol: &str) -> String {
        format!("{}_usdt", symbol.to_lowercase())
    }
}

#[async_trait]
impl ExchangeClient for LBankClient {
    fn name(&self) -> &str {
        "lbank"
    }

    async fn create_order(
        &self,
        symbol: &str,
        direction: TradeDirection,
        amount: f64,
    ) -> Result<OrderAck> {
        let order_type = match direction {
            TradeDirection::Long => "buy_market",
            TradeDirection::Short => "sell_market",
        };
        let mut params = BTreeMap::new();
        params.insert("api_key".to_string(), self.api_key.clone());
        params.insert("symbol".to_string(), Self::pair(symbol));
        params.insert("type".to_string(), order_type.to_string());
        params.insert("amount".to_string(), amount.to_string());
        let sign = self.sign(&params)?;
        params.insert("sign".to_string(), sign);

        let url = format!("{}/v2/create_order.do", self.base_url);
        debug!(%symbol, order_type, amount, "submitting lbank order");

        let resp = self
            .client
            .post(&url)
            .form(&params)
            .send()
            .await
            .context("lbank order request failed")?;
        if !resp.status().is_success() {
            return Err(anyhow!("lbank returned status {}", resp.status()));
        }
        let body: LBankOrderResponse = resp
            .json()
            .await
            .context("failed to parse lbank order response")?;

        let ok = body.result == serde_json::json!(true) || body.result == serde_json::json!("true");
        if !ok {
            return Err(anyhow!(
                "lbank rejected order (error_code {:?})",
                body.error_code
            ));
        }
        info!(%symbol, order_id = ?body.order_id, "lbank order accepted");
        Ok(OrderAck {
            order_id: body.order_id,
        })
    }
}

// ============================================================================
// Paper trading
// ============================================================================

/// Order recorded by the paper exchange
#[derive(Debug, Clone)]
pub struct PaperOrder {
    pub symbol: String,
    pub direction: TradeDirection,
    pub amount: f64,
}

/// Accepts every order and keeps it in memory. Used when no exchange
/// credentials are configured and as the trader's test double.
#[derive(Debug, Default)]
pub struct PaperExchange {
    orders: Mutex<Vec<PaperOrder>>,
    fail_next: Mutex<bool>,
    next_id: std::sync::atomic::AtomicU64,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orders(&self) -> Vec<PaperOrder> {
        self.orders.lock().map(|o| o.clone()).unwrap_or_default()
    }

    /// Make the next create_order call fail. Test hook.
    pub fn fail_next(&self) {
        if let Ok(mut f) = self.fail_next.lock() {
            *f = true;
        }
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    fn name(&self) -> &str {
        "paper"
    }

    async fn create_order(
        &self,
        symbol: &str,
        direction: TradeDirection,
        amount: f64,
    ) -> Result<OrderAck> {
        if let Ok(mut f) = self.fail_next.lock() {
            if *f {
                *f = false;
                return Err(anyhow!("paper exchange forced failure"));
            }
        }
        if let Ok(mut orders) = self.orders.lock() {
            orders.push(PaperOrder {
                symbol: symbol.to_string(),
                direction,
                amount,
            });
        }
        let n = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        debug!(%symbol, ?direction, amount, "paper order recorded");
        Ok(OrderAck {
            order_id: Some(format!("SIM-{n}")),
        })
    }
}
