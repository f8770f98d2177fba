use crate::types::BotConfig;

/// Immutable configuration snapshot for one dip-arbitrage engine.
///
/// Replaced wholesale via `DipArbEngine::configure`; the engine never mutates
/// an applied snapshot in place.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Shares bought per leg.
    pub shares: f64,
    /// Maximum acceptable `leg1.price + leg2.price` when admitting the hedge.
    pub sum_target: f64,
    /// Fractional drop over the sliding window that counts as a dip.
    pub dip_threshold: f64,
    /// Fractional rise over the sliding window that counts as a surge.
    pub surge_threshold: f64,
    /// Width of the instant-move window in milliseconds.
    pub sliding_window_ms: i64,
    /// Minutes from round start during which Leg 1 may be opened.
    pub window_minutes: i64,
    /// Slippage allowance applied on top of the ask when buying.
    pub max_slippage: f64,
    /// Minimum estimated profit rate required to admit Leg 1.
    pub min_profit_rate: f64,
    /// Seconds to wait for a hedge before expiring the round.
    pub leg2_timeout_secs: i64,
    /// Minimum spacing between two executions in milliseconds.
    pub execution_cooldown_ms: i64,
    /// Trade on detected signals without operator involvement.
    pub auto_execute: bool,
    /// Enable the surge detector.
    pub enable_surge: bool,
    /// Merge the pair on-chain after a completed round.
    pub auto_merge: bool,
    pub debug: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&BotConfig::default())
    }
}

impl From<&BotConfig> for EngineConfig {
    fn from(cfg: &BotConfig) -> Self {
        Self {
            shares: cfg.shares,
            sum_target: cfg.sum_target,
            dip_threshold: cfg.dip_threshold,
            surge_threshold: cfg.surge_threshold,
            sliding_window_ms: cfg.sliding_window_ms,
            window_minutes: cfg.window_minutes,
            max_slippage: cfg.max_slippage,
            min_profit_rate: cfg.min_profit_rate,
            leg2_timeout_secs: cfg.leg2_timeout_secs,
            execution_cooldown_ms: cfg.execution_cooldown_ms,
            auto_execute: cfg.auto_execute,
            enable_surge: cfg.enable_surge,
            auto_merge: cfg.auto_merge,
            debug: cfg.debug,
        }
    }
}
