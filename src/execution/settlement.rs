use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::client::clob::ClobClient;
use crate::client::{gamma, ClientResult};
use crate::markets::Side;

/// Token identifiers for both sides of one condition.
#[derive(Clone, Debug)]
pub struct TokenPair {
    pub yes_token_id: String,
    pub no_token_id: String,
}

#[derive(Clone, Debug, Default)]
pub struct MergeResult {
    pub success: bool,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct RedeemResult {
    pub success: bool,
    pub usdc_received: Option<f64>,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

/// Oracle resolution status for one condition.
#[derive(Clone, Copy, Debug)]
pub struct MarketResolution {
    pub is_resolved: bool,
    pub winner: Option<Side>,
}

/// On-chain settlement operations, delegated to the venue's relayer. The bot
/// never constructs transactions itself.
pub enum SettlementBackend {
    Paper(PaperSettlement),
    Live(LiveSettlement),
}

impl SettlementBackend {
    /// Convert equal amounts of both tokens back into `shares` units of quote.
    pub async fn merge(&self, condition_id: &str, shares: f64) -> MergeResult {
        info!(target: "settlement", condition = %condition_id, shares, "merging pair");
        match self {
            SettlementBackend::Paper(paper) => paper.merge(condition_id, shares).await,
            SettlementBackend::Live(live) => live.merge(condition_id, shares).await,
        }
    }

    /// Claim the winning side's payout after oracle resolution.
    pub async fn redeem_by_token_ids(
        &self,
        condition_id: &str,
        tokens: &TokenPair,
    ) -> RedeemResult {
        info!(target: "settlement", condition = %condition_id, "redeeming position");
        match self {
            SettlementBackend::Paper(paper) => paper.redeem(condition_id, tokens).await,
            SettlementBackend::Live(live) => live.redeem(condition_id, tokens).await,
        }
    }

    pub async fn get_market_resolution(&self, condition_id: &str) -> ClientResult<MarketResolution> {
        match self {
            SettlementBackend::Paper(paper) => Ok(paper.resolution(condition_id)),
            SettlementBackend::Live(live) => live.resolution(condition_id).await,
        }
    }
}

/// Settlement stub for paper mode: every operation succeeds with a synthetic
/// transaction hash, and markets resolve immediately with UP winning.
pub struct PaperSettlement;

impl PaperSettlement {
    pub fn new() -> Self {
        Self
    }

    async fn merge(&self, _condition_id: &str, _shares: f64) -> MergeResult {
        MergeResult {
            success: true,
            tx_hash: Some(format!("paper-merge-{}", Uuid::new_v4())),
            error: None,
        }
    }

    async fn redeem(&self, _condition_id: &str, _tokens: &TokenPair) -> RedeemResult {
        RedeemResult {
            success: true,
            usdc_received: None,
            tx_hash: Some(format!("paper-redeem-{}", Uuid::new_v4())),
            error: None,
        }
    }

    fn resolution(&self, _condition_id: &str) -> MarketResolution {
        MarketResolution {
            is_resolved: true,
            winner: Some(Side::Up),
        }
    }
}

impl Default for PaperSettlement {
    fn default() -> Self {
        Self::new()
    }
}

/// Relayer-backed settlement. Merge and redeem go through the signed CLOB
/// relayer endpoints; resolution status comes from market metadata.
pub struct LiveSettlement {
    clob: Arc<ClobClient>,
    http: reqwest::Client,
    gamma_url: String,
}

#[derive(Deserialize)]
struct RelayerResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default, rename = "transactionHash")]
    transaction_hash: Option<String>,
    #[serde(default, rename = "usdcReceived")]
    usdc_received: Option<f64>,
    #[serde(default, rename = "errorMsg")]
    error_msg: Option<String>,
}

impl LiveSettlement {
    pub fn new(clob: Arc<ClobClient>, http: reqwest::Client, gamma_url: String) -> Self {
        Self {
            clob,
            http,
            gamma_url,
        }
    }

    async fn merge(&self, condition_id: &str, shares: f64) -> MergeResult {
        #[derive(Serialize)]
        struct MergeRequest<'a> {
            condition_id: &'a str,
            amount: f64,
        }

        let payload = MergeRequest {
            condition_id,
            amount: shares,
        };
        match self
            .clob
            .post_private::<_, RelayerResponse>("/ctf/merge", &payload)
            .await
        {
            Ok(resp) => MergeResult {
                success: resp.success.unwrap_or(resp.error_msg.is_none()),
                tx_hash: resp.transaction_hash,
                error: resp.error_msg,
            },
            Err(err) => MergeResult {
                success: false,
                tx_hash: None,
                error: Some(err.to_string()),
            },
        }
    }

    async fn redeem(&self, condition_id: &str, tokens: &TokenPair) -> RedeemResult {
        #[derive(Serialize)]
        struct RedeemRequest<'a> {
            condition_id: &'a str,
            yes_token_id: &'a str,
            no_token_id: &'a str,
        }

        let payload = RedeemRequest {
            condition_id,
            yes_token_id: &tokens.yes_token_id,
            no_token_id: &tokens.no_token_id,
        };
        match self
            .clob
            .post_private::<_, RelayerResponse>("/ctf/redeem", &payload)
            .await
        {
            Ok(resp) => RedeemResult {
                success: resp.success.unwrap_or(resp.error_msg.is_none()),
                usdc_received: resp.usdc_received,
                tx_hash: resp.transaction_hash,
                error: resp.error_msg,
            },
            Err(err) => RedeemResult {
                success: false,
                usdc_received: None,
                tx_hash: None,
                error: Some(err.to_string()),
            },
        }
    }

    async fn resolution(&self, condition_id: &str) -> ClientResult<MarketResolution> {
        let market =
            gamma::fetch_market_by_condition_id(&self.http, &self.gamma_url, condition_id).await?;
        Ok(match market {
            Some(m) => MarketResolution {
                is_resolved: m.closed && m.winner.is_some(),
                winner: m.winner,
            },
            None => MarketResolution {
                is_resolved: false,
                winner: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn paper_settlement_round_trip() {
        let backend = SettlementBackend::Paper(PaperSettlement::new());

        let merge = backend.merge("0xc0ffee", 20.0).await;
        assert!(merge.success);
        assert!(merge.tx_hash.unwrap().starts_with("paper-merge-"));

        let pair = TokenPair {
            yes_token_id: "y".to_string(),
            no_token_id: "n".to_string(),
        };
        let redeem = backend.redeem_by_token_ids("0xc0ffee", &pair).await;
        assert!(redeem.success);

        let res = backend.get_market_resolution("0xc0ffee").await.unwrap();
        assert!(res.is_resolved);
        assert_eq!(res.winner, Some(Side::Up));
    }
}
