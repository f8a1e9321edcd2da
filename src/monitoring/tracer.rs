/*!
 * Tracing Setup
 * Structured logging for lock events using the tracing crate
 *
 * The library itself only emits events:
 * - `debug`: counter allocation, pooling, recycling and replacement
 * - `trace`: every writer drain
 * - `error`: fatal protocol misuse
 */

use tracing::info;
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - LRLOCK_TRACE_JSON: Enable JSON output (default: false)
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("LRLOCK_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_line_number(true)
                    .with_file(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_ok() {
        info!(json = use_json, "Lock tracing initialized");
    }
}
