//! Tracing subscriber setup for the binaries.

use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

/// Filter used when neither `BQB_LOG` nor `RUST_LOG` is set.
fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "bq_browser=info,warn",
        _ => "bq_browser=debug,info",
    }
}

fn filter(verbosity: u8) -> EnvFilter {
    dotenvy::var("BQB_LOG")
        .or_else(|_| dotenvy::var("RUST_LOG"))
        .ok()
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directive(verbosity)))
}

/// Install a stderr fmt subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init(verbosity: u8) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(verbosity))
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}
