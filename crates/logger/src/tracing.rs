use std::env::var;
use std::str::FromStr;

use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the log layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

pub fn init() {
    initialize_tracing(LevelFilter::INFO, None);
}

/// Environment-only setup: `RUST_LOG` and `RUST_LOG_FORMAT`
pub fn init_tracing() {
    init();
}

/// Setup with a configured default level and format
///
/// `RUST_LOG` still takes precedence over `level`, and `RUST_LOG_FORMAT`
/// over `format`.
pub fn init_with(level: &str, format: Option<&str>) {
    let level = level.parse::<LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{level}', falling back to info");
        LevelFilter::INFO
    });
    initialize_tracing(level, format.map(str::to_string));
}

/// Initialize tracing subscriber with default configuration.
fn initialize_tracing(level: LevelFilter, configured_format: Option<String>) {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let log_format = var("RUST_LOG_FORMAT").ok().or(configured_format).unwrap_or_default();
    let log_format = log_format.parse::<LogFormat>().unwrap_or_else(|error| {
        eprintln!("{error}, falling back to compact");
        LogFormat::Compact
    });

    let log_layer = match log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .without_time()
            .with_filter(env_filter)
            .boxed(),
    };

    if let Err(error) = tracing_subscriber::registry().with(log_layer).try_init() {
        warn!("Tracing was already initialized: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("Compact".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert_eq!("".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert!("pretty".parse::<LogFormat>().is_err());
    }
}
