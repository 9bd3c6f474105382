//! Engine diagnostics for production debugging
//!
//! `dump_diagnostics` writes a snapshot of a running engine: its state,
//! pending tokens (oldest parked first), open regions, the site pool and the
//! run counters. With the `diagnostics` feature on a Unix host, SIGQUIT
//! (`kill -3 <pid>`) dumps it to stderr while the program keeps running.
//!
//! ## Signal Safety
//!
//! The dump takes locks and does I/O, so it never runs inside a signal
//! handler. A dedicated thread waits on signal-hook's iterator and dumps
//! from ordinary thread context.

use crate::engine::Engine;
use std::io::Write;
use std::time::Duration;

/// Cap on tokens and regions listed individually
const DISPLAY_LIMIT: usize = 20;

/// Dump diagnostics for `engine` on every SIGQUIT
///
/// Only the first engine registered this way is dumped; later calls do
/// nothing. Does nothing on non-Unix hosts or without the `diagnostics`
/// feature.
pub fn install_signal_handler(engine: &Engine) {
    #[cfg(all(unix, feature = "diagnostics"))]
    {
        use signal_hook::consts::SIGQUIT;
        use signal_hook::iterator::Signals;
        use std::sync::Once;

        static SIGNAL_HANDLER_INIT: Once = Once::new();

        SIGNAL_HANDLER_INIT.call_once(|| {
            let mut signals = match Signals::new([SIGQUIT]) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("cannot register SIGQUIT handler: {}", e);
                    return;
                }
            };
            let engine = engine.clone();
            let spawned = std::thread::Builder::new()
                .name("weft-diagnostics".to_string())
                .spawn(move || {
                    for sig in signals.forever() {
                        if sig == SIGQUIT {
                            dump_to_stderr(&engine);
                        }
                    }
                });
            if let Err(e) = spawned {
                tracing::warn!("cannot start diagnostics thread: {}", e);
            }
        });
    }
    #[cfg(not(all(unix, feature = "diagnostics")))]
    let _ = engine;
}

pub fn dump_to_stderr(engine: &Engine) {
    let mut out = std::io::stderr().lock();
    dump_diagnostics(engine, &mut out);
}

/// Write a diagnostics snapshot of `engine` to `out`
///
/// Write errors are ignored; diagnostics are best effort.
pub fn dump_diagnostics(engine: &Engine, out: &mut dyn Write) {
    let _ = writeln!(out, "\n=== Weft Engine Diagnostics ===");
    let _ = writeln!(out, "Timestamp: {:?}", std::time::SystemTime::now());

    let summary = engine.summary();
    let _ = writeln!(out, "\n[Engine]");
    let _ = writeln!(out, "  State:        {}", engine.state().as_str());
    let _ = writeln!(out, "  Pending:      {}", engine.pending());
    let _ = writeln!(out, "  Queued:       {}", engine.queued());
    let _ = writeln!(out, "  Elapsed:      {}", format_duration(Duration::from_millis(summary.elapsed_ms)));

    let _ = writeln!(out, "\n[Counters]");
    let _ = writeln!(out, "  Publications: {}", summary.publications);
    let _ = writeln!(out, "  Tokens:       {} (total)", summary.tokens_created);
    let _ = writeln!(out, "  Peak tokens:  {} (high-water mark)", summary.peak_tokens);
    let _ = writeln!(out, "  Site calls:   {}", summary.site_calls);
    let _ = writeln!(out, "  Errors:       {}", summary.errors);

    let pool = engine.pool_stats();
    let _ = writeln!(out, "\n[Site Pool]");
    let _ = writeln!(
        out,
        "  {} thread(s), {} busy, {} queued, {} completed",
        pool.threads, pool.busy, pool.queued, pool.completed
    );

    // Parked the longest first, then the oldest
    let mut tokens = engine.tokens();
    tokens.sort_by(|a, b| {
        let parked = |t: &crate::scope::TokenInfo| t.parked.map(|(_, d)| d).unwrap_or_default();
        parked(b).cmp(&parked(a)).then(b.age.cmp(&a.age))
    });
    let _ = writeln!(out, "\n[Tokens]");
    if tokens.is_empty() {
        let _ = writeln!(out, "  (no pending tokens)");
    }
    for (idx, token) in tokens.iter().take(DISPLAY_LIMIT).enumerate() {
        let _ = write!(
            out,
            "  [{:2}] {:<8} in {:<6} age {}",
            idx + 1,
            token.id.to_string(),
            token.region.to_string(),
            format_duration(token.age)
        );
        match token.parked {
            Some((node, waited)) => {
                let kind = engine.node_kind(node).unwrap_or("?");
                let _ = writeln!(
                    out,
                    ", parked at {} ({}) for {}",
                    node,
                    kind,
                    format_duration(waited)
                );
            }
            None => {
                let _ = writeln!(out, ", runnable");
            }
        }
    }
    if tokens.len() > DISPLAY_LIMIT {
        let _ = writeln!(out, "  ... and {} more tokens", tokens.len() - DISPLAY_LIMIT);
    }

    let regions = engine.regions();
    let _ = writeln!(out, "\n[Regions]");
    if regions.is_empty() {
        let _ = writeln!(out, "  (no open regions)");
    }
    for region in regions.iter().take(DISPLAY_LIMIT) {
        let parent = region
            .parent
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "  {:<6} {:<10} parent {:<6} {} token(s), {} child region(s)",
            region.id.to_string(),
            region.kind,
            parent,
            region.tokens,
            region.children
        );
    }
    if regions.len() > DISPLAY_LIMIT {
        let _ = writeln!(out, "  ... and {} more regions", regions.len() - DISPLAY_LIMIT);
    }

    let _ = writeln!(out, "\n=== End Diagnostics ===\n");
}

/// Format a duration for humans
fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs >= 3600.0 {
        format!("{:.1}h", secs / 3600.0)
    } else if secs >= 60.0 {
        format!("{:.1}m", secs / 60.0)
    } else if secs >= 1.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{}ms", d.as_millis())
    }
}
