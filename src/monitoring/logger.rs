use serde::Serialize;
use tracing::info;

use crate::types::AppConfig;

#[derive(Serialize)]
struct StartupLog<'a> {
    event: &'a str,
    execution_mode: &'a str,
    underlyings: Vec<&'a str>,
    duration: &'a str,
    auto_execute: bool,
}

pub fn log_startup(cfg: &AppConfig) {
    let mode = match cfg.execution.mode {
        crate::types::ExecutionMode::Paper => "paper",
        crate::types::ExecutionMode::Live => "live",
    };
    let underlyings = cfg
        .rotation
        .underlyings
        .iter()
        .map(|u| u.as_str())
        .collect();
    let payload = StartupLog {
        event: "startup",
        execution_mode: mode,
        underlyings,
        duration: &cfg.rotation.duration,
        auto_execute: cfg.bot.auto_execute,
    };
    info!(target: "bot", startup = serde_json::to_string(&payload).unwrap_or_default().as_str());
}
