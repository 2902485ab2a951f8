//! Log setup for the `relmap` binary.
//!
//! Runs are usually scheduled jobs whose stdout is either a human report or
//! a JSON document, so all logging goes to stderr. `--json` switches the log
//! lines themselves to JSON for collection alongside the run manifest.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events follow the CLI verbosity. Everything else, notably
/// the HTTP stack, stays at `warn`.
const OWN_TARGETS: [&str; 3] = ["relmap", "relmap_core", "relmap_github"];

/// Filter directives used when `RUST_LOG` is unset.
fn default_directives(level: Level) -> String {
    let level = level.as_str().to_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(OWN_TARGETS.iter().map(|t| format!("{t}={level}")));
    directives.join(",")
}

/// Install the global subscriber; `RUST_LOG` overrides `level`.
///
/// A subscriber installed earlier (e.g. by another test) wins, so a second
/// call does nothing.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let installed = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json().with_current_span(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
