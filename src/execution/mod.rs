use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::clob::ClobClient;
use crate::client::ClientError;
use crate::monitoring::metrics::METRICS;
use crate::types::{AppConfig, ExecutionMode};

pub mod settlement;

pub use settlement::{
    MarketResolution, MergeResult, PaperSettlement, RedeemResult, SettlementBackend, TokenPair,
};

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Immediate-or-cancel market order against one outcome token.
///
/// `quote_amount` is what actually goes on the wire for buys; `limit_price`
/// and `shares` describe the intent for logging and paper fills.
#[derive(Clone, Debug)]
pub struct MarketOrderRequest {
    pub token_id: String,
    pub side: OrderSide,
    pub shares: f64,
    pub limit_price: f64,
    pub quote_amount: f64,
    pub client_order_id: String,
}

/// Structured outcome of one order attempt. Failures are folded in rather
/// than raised so callers always get a result to report.
#[derive(Clone, Debug, Default)]
pub struct MarketOrderResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub transaction_hashes: Vec<String>,
    pub error_message: Option<String>,
}

/// Backend for execution, either simulated (paper) or live CLOB.
pub enum ExecutionBackend {
    Paper(PaperExecutor),
    Live(LiveExecutor),
}

impl ExecutionBackend {
    pub fn from_config(cfg: &AppConfig, clob: Arc<ClobClient>) -> ExecutionResult<Self> {
        match cfg.execution.mode {
            ExecutionMode::Paper => Ok(ExecutionBackend::Paper(PaperExecutor::new())),
            ExecutionMode::Live => {
                if !clob.can_sign() {
                    return Err(ExecutionError::Config(
                        "gnosis_safe_address must be configured for live execution".to_string(),
                    ));
                }
                Ok(ExecutionBackend::Live(LiveExecutor::new(clob)))
            }
        }
    }

    pub async fn market_order(&self, req: &MarketOrderRequest) -> MarketOrderResult {
        info!(
            target: "execution",
            token = %req.token_id,
            side = req.side.as_str(),
            shares = req.shares,
            limit = req.limit_price,
            quote = req.quote_amount,
            order = %req.client_order_id,
            "submitting market order"
        );
        METRICS.record_order_submitted(&req.client_order_id);

        let result = match self {
            ExecutionBackend::Paper(paper) => paper.market_order(req).await,
            ExecutionBackend::Live(live) => live.market_order(req).await,
        };

        if !result.success {
            let reason = result.error_message.as_deref().unwrap_or("unknown");
            warn!(
                target: "execution",
                order = %req.client_order_id,
                reason,
                "market order failed"
            );
            METRICS.record_order_failed(reason);
        }
        result
    }
}

/// Fills every order immediately at its limit price with a synthetic id.
pub struct PaperExecutor;

impl PaperExecutor {
    pub fn new() -> Self {
        Self
    }

    async fn market_order(&self, _req: &MarketOrderRequest) -> MarketOrderResult {
        // Simulate a little venue latency.
        tokio::time::sleep(Duration::from_millis(5)).await;
        MarketOrderResult {
            success: true,
            order_id: Some(format!("paper-{}", Uuid::new_v4())),
            transaction_hashes: Vec::new(),
            error_message: None,
        }
    }
}

impl Default for PaperExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Live CLOB adapter submitting FOK market orders.
pub struct LiveExecutor {
    clob: Arc<ClobClient>,
}

impl LiveExecutor {
    pub fn new(clob: Arc<ClobClient>) -> Self {
        Self { clob }
    }

    async fn market_order(&self, req: &MarketOrderRequest) -> MarketOrderResult {
        #[derive(Serialize)]
        struct PlaceOrderRequest<'a> {
            token_id: &'a str,
            side: &'a str,
            amount: f64,
            client_order_id: &'a str,
            #[serde(rename = "type")]
            order_type: &'a str,
        }

        #[derive(Deserialize)]
        struct PlaceOrderResponse {
            #[serde(default)]
            success: Option<bool>,
            #[serde(default, rename = "orderID")]
            order_id: Option<String>,
            #[serde(default, rename = "transactionsHashes")]
            transaction_hashes: Option<Vec<String>>,
            #[serde(default, rename = "errorMsg")]
            error_msg: Option<String>,
        }

        let payload = PlaceOrderRequest {
            token_id: &req.token_id,
            side: req.side.as_str(),
            amount: req.quote_amount,
            client_order_id: &req.client_order_id,
            order_type: "FOK",
        };

        match self
            .clob
            .post_private::<_, PlaceOrderResponse>("/order", &payload)
            .await
        {
            Ok(resp) => {
                let success = resp.success.unwrap_or(resp.error_msg.is_none());
                MarketOrderResult {
                    success,
                    order_id: resp.order_id,
                    transaction_hashes: resp.transaction_hashes.unwrap_or_default(),
                    error_message: resp.error_msg,
                }
            }
            Err(err) => MarketOrderResult {
                success: false,
                order_id: None,
                transaction_hashes: Vec::new(),
                error_message: Some(err.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> MarketOrderRequest {
        MarketOrderRequest {
            token_id: "tok-up".to_string(),
            side: OrderSide::Buy,
            shares: 20.0,
            limit_price: 0.357,
            quote_amount: 7.14,
            client_order_id: "round-1-leg1".to_string(),
        }
    }

    #[tokio::test]
    async fn paper_orders_always_fill() {
        let backend = ExecutionBackend::Paper(PaperExecutor::new());
        let result = backend.market_order(&request()).await;
        assert!(result.success);
        assert!(result.order_id.unwrap().starts_with("paper-"));
        assert!(result.error_message.is_none());
    }
}
