//! Telemetry and Observability
//!
//! Sets up `tracing-subscriber` for structured logging. The configured log
//! level applies unless `RUST_LOG` is set. Debug builds print pretty
//! terminal output; release builds emit JSON lines with the current span,
//! which carries the run id of the orchestration loop.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber with the given log level from config.
///
/// Priority: `RUST_LOG` env var > `log_level` parameter > default "info"
///
/// Logs go to stderr so that `--json` event output on stdout stays
/// machine-readable.
pub fn init_telemetry_with_level(log_level: &str) {
    let default_filter = format!("{},warden_engine={}", log_level, log_level);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }
}

/// Initialize the tracing subscriber with default settings.
///
/// Falls back to "warn" so that interactive runs are not drowned in logs
/// before the configuration has been read.
pub fn init_telemetry() {
    init_telemetry_with_level("warn");
}
