use std::fs;

use anyhow::Context;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Paper,
    Live,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    pub clob_url: String,
    pub gamma_url: String,
    pub ws_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: String,
    pub wallet_private_key: String,
    pub gnosis_safe_address: Option<String>,
}

fn default_shares() -> f64 {
    20.0
}
fn default_sum_target() -> f64 {
    0.95
}
fn default_dip_threshold() -> f64 {
    0.15
}
fn default_surge_threshold() -> f64 {
    0.15
}
fn default_sliding_window_ms() -> i64 {
    3_000
}
fn default_window_minutes() -> i64 {
    2
}
fn default_max_slippage() -> f64 {
    0.02
}
fn default_min_profit_rate() -> f64 {
    0.03
}
fn default_leg2_timeout_secs() -> i64 {
    300
}
fn default_execution_cooldown_ms() -> i64 {
    3_000
}
fn default_true() -> bool {
    true
}

/// Strategy parameters for the dip-arbitrage engine, loaded from `[bot]`.
///
/// Every field carries the engine's documented default so a minimal config
/// file only overrides what it cares about.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BotConfig {
    /// Shares bought on each leg.
    #[serde(default = "default_shares")]
    pub shares: f64,
    /// Maximum acceptable leg1 + leg2 price sum when admitting the hedge.
    #[serde(default = "default_sum_target")]
    pub sum_target: f64,
    /// Fractional drop over the sliding window that counts as a dip.
    #[serde(default = "default_dip_threshold")]
    pub dip_threshold: f64,
    /// Fractional rise over the sliding window that counts as a surge.
    #[serde(default = "default_surge_threshold")]
    pub surge_threshold: f64,
    /// Width of the instant-move window in milliseconds.
    #[serde(default = "default_sliding_window_ms")]
    pub sliding_window_ms: i64,
    /// Minutes from round start during which Leg 1 can be opened.
    #[serde(default = "default_window_minutes")]
    pub window_minutes: i64,
    /// Slippage allowance applied to the ask when sizing the quote amount.
    #[serde(default = "default_max_slippage")]
    pub max_slippage: f64,
    /// Minimum estimated profit rate required to admit Leg 1.
    #[serde(default = "default_min_profit_rate")]
    pub min_profit_rate: f64,
    /// Seconds the engine waits for a hedge before expiring the round.
    #[serde(default = "default_leg2_timeout_secs")]
    pub leg2_timeout_secs: i64,
    /// Minimum spacing between two executions in milliseconds.
    #[serde(default = "default_execution_cooldown_ms")]
    pub execution_cooldown_ms: i64,
    /// When true the engine trades on its own signals.
    #[serde(default)]
    pub auto_execute: bool,
    /// Enables the surge detector (buy the other side of a spike).
    #[serde(default = "default_true")]
    pub enable_surge: bool,
    /// Merge the pair on-chain after a completed round.
    #[serde(default = "default_true")]
    pub auto_merge: bool,
    #[serde(default)]
    pub debug: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            shares: default_shares(),
            sum_target: default_sum_target(),
            dip_threshold: default_dip_threshold(),
            surge_threshold: default_surge_threshold(),
            sliding_window_ms: default_sliding_window_ms(),
            window_minutes: default_window_minutes(),
            max_slippage: default_max_slippage(),
            min_profit_rate: default_min_profit_rate(),
            leg2_timeout_secs: default_leg2_timeout_secs(),
            execution_cooldown_ms: default_execution_cooldown_ms(),
            auto_execute: false,
            enable_surge: true,
            auto_merge: true,
            debug: false,
        }
    }
}

fn default_preload_minutes() -> i64 {
    2
}
fn default_redeem_wait_minutes() -> i64 {
    5
}
fn default_redeem_retry_interval_secs() -> u64 {
    30
}
fn default_settle_strategy() -> String {
    "redeem".to_string()
}

/// Auto-rotation settings, loaded from `[rotation]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RotationSettings {
    /// Underlyings to rotate across, e.g. ["btc", "eth"].
    pub underlyings: Vec<String>,
    /// Round duration, "5m" or "15m".
    pub duration: String,
    #[serde(default = "default_preload_minutes")]
    pub preload_minutes: i64,
    #[serde(default = "default_true")]
    pub auto_settle: bool,
    /// "redeem" (wait for oracle resolution) or "sell" (dump immediately).
    #[serde(default = "default_settle_strategy")]
    pub settle_strategy: String,
    #[serde(default = "default_redeem_wait_minutes")]
    pub redeem_wait_minutes: i64,
    #[serde(default = "default_redeem_retry_interval_secs")]
    pub redeem_retry_interval_secs: u64,
}

fn default_health_addr() -> String {
    "127.0.0.1:9464".to_string()
}
fn default_max_staleness_secs() -> u64 {
    120
}

/// Health endpoint settings, loaded from `[monitoring]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Bind address for the TCP health endpoint.
    #[serde(default = "default_health_addr")]
    pub health_addr: String,
    /// Seconds without any recorded event before the bot reports stale.
    #[serde(default = "default_max_staleness_secs")]
    pub max_staleness_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            health_addr: default_health_addr(),
            max_staleness_secs: default_max_staleness_secs(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub mode: ExecutionMode,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    #[serde(default)]
    pub bot: BotConfig,
    pub rotation: RotationSettings,
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    pub execution: ExecutionConfig,
}

impl AppConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at {path}"))?;
        let cfg: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to deserialize TOML config at {path}"))?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config_applies_bot_defaults() {
        let toml = r#"
            [api]
            clob_url = "https://clob.polymarket.com"
            gamma_url = "https://gamma-api.polymarket.com"
            ws_url = "wss://ws-subscriptions-clob.polymarket.com/ws/market"
            api_key = "key"
            api_secret = "secret"
            api_passphrase = "pass"
            wallet_private_key = "priv"

            [bot]
            auto_execute = true

            [rotation]
            underlyings = ["btc", "eth"]
            duration = "15m"

            [postgres]
            url = "postgres://localhost/dipbot"

            [execution]
            mode = "paper"
        "#;

        let cfg: AppConfig = toml::from_str(toml).expect("config should parse");
        assert!(cfg.bot.auto_execute);
        assert!((cfg.bot.shares - 20.0).abs() < f64::EPSILON);
        assert!((cfg.bot.sum_target - 0.95).abs() < f64::EPSILON);
        assert_eq!(cfg.bot.sliding_window_ms, 3_000);
        assert_eq!(cfg.bot.leg2_timeout_secs, 300);
        assert!(cfg.bot.enable_surge);
        assert_eq!(cfg.rotation.preload_minutes, 2);
        assert_eq!(cfg.rotation.settle_strategy, "redeem");
        assert_eq!(cfg.monitoring.health_addr, "127.0.0.1:9464");
        assert_eq!(cfg.monitoring.max_staleness_secs, 120);
        assert_eq!(cfg.execution.mode, ExecutionMode::Paper);
    }
}
