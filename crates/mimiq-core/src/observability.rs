//! Observability infrastructure.
//!
//! Structured logging with consistent spans across the emulator. The
//! engine logs dispatch attempts and lifecycle transitions; the API crate
//! adds request tracing on top.

use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs.
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at startup. Safe to call multiple times; subsequent calls are
/// no-ops. Log levels come from `RUST_LOG` (default `info`).
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for one dispatch attempt with standard fields.
#[must_use]
pub fn dispatch_span(queue: &str, task: &str, attempt: i32) -> Span {
    tracing::info_span!("dispatch", queue = queue, task = task, attempt = attempt)
}
