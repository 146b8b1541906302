//! Telemetry and Observability
//!
//! Sets up `tracing-subscriber` for structured logging. The level comes from
//! the config file unless `RUST_LOG` overrides it, and `core.log_format`
//! switches between human-readable and JSON output.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Anything other than "json" is treated as text
    pub fn from_config(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

fn env_filter(log_level: &str) -> EnvFilter {
    let default_filter = format!(
        "{},cadence_engine={},sqlx=warn,hyper=warn",
        log_level, log_level
    );
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter))
}

/// Initialize the tracing subscriber with a level and output format.
///
/// Priority: `RUST_LOG` env var > `log_level` parameter.
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_telemetry_with_format(log_level: &str, format: LogFormat) {
    let filter = env_filter(log_level);

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_current_span(true))
                .try_init()
                .ok();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(false))
                .try_init()
                .ok();
        }
    }
}

/// Initialize the tracing subscriber with the given log level and text output.
pub fn init_telemetry_with_level(log_level: &str) {
    init_telemetry_with_format(log_level, LogFormat::Text);
}

/// Initialize the tracing subscriber with default settings.
///
/// Falls back to "info" level if no `RUST_LOG` env var is set.
/// Use `init_telemetry_with_format` when config is available.
pub fn init_telemetry() {
    init_telemetry_with_level("info");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!(LogFormat::from_config("json"), LogFormat::Json);
        assert_eq!(LogFormat::from_config("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_config("text"), LogFormat::Text);
        assert_eq!(LogFormat::from_config("pretty"), LogFormat::Text);
    }

    #[test]
    fn test_repeated_init_is_harmless() {
        init_telemetry();
        init_telemetry_with_format("debug", LogFormat::Json);
    }
}
