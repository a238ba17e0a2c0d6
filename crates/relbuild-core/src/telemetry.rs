//! Tracing setup for the relbuild binary.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored
//! (the global subscriber can only be set once per process).

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events follow the requested verbosity. Everything else
/// (tokio, third-party libraries) is capped at `warn`.
const RELBUILD_TARGETS: &[&str] = &["relbuild_core", "relbuild_pipeline", "relbuild_cli"];

/// Filter directives used when `RUST_LOG` is not set.
pub fn default_filter(level: Level) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(
        RELBUILD_TARGETS
            .iter()
            .map(|target| format!("{target}={}", level.as_str().to_ascii_lowercase())),
    );
    directives.join(",")
}

/// Initialise the global tracing subscriber.
///
/// `RUST_LOG` wins over `level` when set. Events go to stderr: stdout is
/// reserved for the published artifact path, so scripts can capture it.
/// With `json`, each event is one JSON object per line, carrying the
/// `pipeline` span's `run_id` and `target` fields.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let result = if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json().with_current_span(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
    };
    // Already initialised (tests, embedding): keep the existing subscriber.
    let _ = result;
}
