//! Structured logging init (spec-full §2.3), grounded in the teacher's
//! `monitoring::logging::init_structured_logging`: a JSON-formatting
//! `tracing-subscriber` layer driven by `RUST_LOG`/`--log-level`, rather
//! than a bespoke logging facade. `Event.correlation_id`, when present, is
//! attached to request-handling spans the way the teacher's
//! `monitoring::correlation` module attaches request correlation ids —
//! callers do this with `tracing::info_span!(correlation_id = %id)`
//! around the unit of work, not through a global formatter hook.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber. `level` is the
/// `--log-level` CLI override; `RUST_LOG` still wins if set, matching the
/// teacher's `EnvFilter::try_from_default_env().unwrap_or_else(...)`.
pub fn init(level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .json()
        .init();
}
