//! logging
//!
//! Single initialization point for diagnostics.
//!
//! Output goes to stderr so stdout stays clean for listings and JSON.
//! `RUST_LOG` overrides the default filter when set.

use std::io::IsTerminal;
use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT_ONCE: Once = Once::new();

/// Default filter directive.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "snapwarden=debug"
    } else {
        "snapwarden=info"
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(debug: bool) {
    INIT_ONCE.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));
        // A subscriber installed elsewhere (tests) wins.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .with_target(false)
            .try_init();
    });
}
