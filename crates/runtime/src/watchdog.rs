//! Watchdog for tokens parked too long
//!
//! A token parked on a cell or a site call for a long time usually means a
//! site that never answers or a pruning scope that never publishes. The
//! watchdog samples the engine's token table and reports such tokens.
//!
//! ## Configuration (Environment Variables)
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `WEFT_WATCHDOG_SECS` | `0` (disabled) | Threshold in seconds for a "stuck" token |
//! | `WEFT_WATCHDOG_INTERVAL` | `5` | Check frequency in seconds |
//! | `WEFT_WATCHDOG_ACTION` | `warn` | `warn` (log and dump diagnostics) or `terminate` (also stop the engine) |
//!
//! ## Example
//!
//! ```bash
//! # Warn about tokens parked for more than 30 seconds, checking every 10
//! WEFT_WATCHDOG_SECS=30 WEFT_WATCHDOG_INTERVAL=10 weft run program.toml
//! ```

use crate::diagnostics::dump_to_stderr;
use crate::engine::{Engine, EngineState};
use crate::scope::{TokenId, TokenInfo};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::warn;
use weft_core::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Seconds a token may stay parked before it counts as stuck
    pub threshold_secs: u64,
    pub interval_secs: u64,
    pub action: WatchdogAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    /// Log a warning and dump diagnostics
    Warn,
    /// Dump diagnostics and terminate the engine
    Terminate,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            threshold_secs: 0,
            interval_secs: 5,
            action: WatchdogAction::Warn,
        }
    }
}

impl WatchdogConfig {
    pub fn from_env() -> Self {
        let threshold_secs = std::env::var("WEFT_WATCHDOG_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let interval_secs = std::env::var("WEFT_WATCHDOG_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|&v| v > 0)
            .unwrap_or(5);

        let action = match std::env::var("WEFT_WATCHDOG_ACTION") {
            Ok(s) if s.eq_ignore_ascii_case("terminate") => WatchdogAction::Terminate,
            _ => WatchdogAction::Warn,
        };

        Self {
            threshold_secs,
            interval_secs,
            action,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.threshold_secs > 0
    }
}

/// Start watching `engine`
///
/// Returns `None` if the watchdog is disabled or its thread could not be
/// spawned. The thread exits once the engine has terminated.
pub fn install_watchdog(engine: &Engine, config: WatchdogConfig) -> Option<JoinHandle<()>> {
    if !config.is_enabled() {
        return None;
    }
    tracing::info!(
        threshold_secs = config.threshold_secs,
        interval_secs = config.interval_secs,
        action = ?config.action,
        "watchdog enabled"
    );
    let engine = engine.clone();
    match std::thread::Builder::new()
        .name("weft-watchdog".to_string())
        .spawn(move || watchdog_loop(engine, config))
    {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("failed to start watchdog thread: {}", e);
            None
        }
    }
}

fn watchdog_loop(engine: Engine, config: WatchdogConfig) {
    let interval = Duration::from_secs(config.interval_secs);
    let threshold = Duration::from_secs(config.threshold_secs);
    let mut last: Option<TokenId> = None;

    loop {
        std::thread::sleep(interval);
        if engine.state() == EngineState::Terminated {
            return;
        }
        if let Some(stuck) = check_for_stuck(&engine.tokens(), threshold) {
            handle_stuck(&engine, stuck, &config, &mut last);
        }
    }
}

/// The token parked the longest beyond `threshold`, if any
fn check_for_stuck(tokens: &[TokenInfo], threshold: Duration) -> Option<(TokenId, NodeId, Duration)> {
    tokens
        .iter()
        .filter_map(|t| t.parked.map(|(node, waited)| (t.id, node, waited)))
        .filter(|(_, _, waited)| *waited > threshold)
        .max_by_key(|(_, _, waited)| *waited)
}

fn handle_stuck(
    engine: &Engine,
    (token, node, waited): (TokenId, NodeId, Duration),
    config: &WatchdogConfig,
    last: &mut Option<TokenId>,
) {
    let is_new = last.replace(token) != Some(token);
    warn!(
        %token,
        %node,
        waited_secs = waited.as_secs(),
        threshold_secs = config.threshold_secs,
        "watchdog: token parked too long"
    );

    // Dump once per stuck token, not on every check
    if is_new {
        dump_to_stderr(engine);
    }

    if config.action == WatchdogAction::Terminate {
        warn!("watchdog: terminating engine (WEFT_WATCHDOG_ACTION=terminate)");
        engine.terminate();
    }
}
