//! Logging initialization.
//!
//! Output goes through `tracing-subscriber` in one of two formats:
//!
//! - **Text**: human-readable, optionally colored
//! - **JSON**: one object per line for log aggregation
//!
//! `RUST_LOG` takes precedence over the configured level when set.
//!
//! ```no_run
//! use collector_app::logging::{self, LogConfig};
//!
//! logging::init(&LogConfig::default().with_level("debug")).unwrap();
//! ```

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Log output format selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text format with optional ANSI colors.
    #[default]
    Text,
    /// Structured JSON format for machine parsing.
    Json,
}

impl LogFormat {
    /// Parse a format name; anything but `json` is text.
    pub fn parse(name: &str) -> Self {
        if name.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Logging configuration options.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to output.
    pub level: Level,
    /// Output format (text or JSON).
    pub format: LogFormat,
    /// Enable ANSI color codes (text format only).
    pub ansi_colors: bool,
    /// Include file/line source locations in output.
    pub with_source_location: bool,
    /// Include thread IDs in output.
    pub with_thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Text,
            ansi_colors: true,
            with_source_location: false,
            with_thread_ids: false,
        }
    }
}

impl LogConfig {
    /// Create a JSON logging configuration.
    pub fn json() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Json,
            ansi_colors: false,
            with_source_location: true,
            with_thread_ids: true,
        }
    }

    /// Set the log level from a string. Unknown names fall back to INFO.
    pub fn with_level(mut self, level: &str) -> Self {
        self.level = match level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" | "warning" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        self
    }

    /// Build from the `[logging]` section of the config file.
    pub fn from_config(config: &LoggingConfig) -> Self {
        let base = match LogFormat::parse(&config.format) {
            LogFormat::Text => Self {
                ansi_colors: config.colors,
                ..Self::default()
            },
            LogFormat::Json => Self::json(),
        };
        base.with_level(&config.level)
    }
}

/// Filter for `config`, unless `RUST_LOG` is set. HTTP client internals are
/// capped at WARN.
fn env_filter(config: &LogConfig) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    Ok(EnvFilter::new(config.level.as_str())
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("h2=warn".parse()?))
}

/// Initialize the global logging subscriber.
///
/// This should be called once at application startup.
pub fn init(config: &LogConfig) -> anyhow::Result<()> {
    let filter = env_filter(config)?;

    match config.format {
        LogFormat::Text => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_ansi(config.ansi_colors)
                .with_target(true)
                .with_thread_ids(config.with_thread_ids)
                .with_file(config.with_source_location)
                .with_line_number(config.with_source_location);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_thread_ids(config.with_thread_ids)
                .with_file(config.with_source_location)
                .with_line_number(config.with_source_location)
                .with_current_span(true);

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()?;
        }
    }
    Ok(())
}
