//! Structured logging setup for applications embedding the gateway.
//!
//! The library itself only emits `tracing` events; the host decides where they
//! go. [`init_logging`] installs a console layer on stderr and, when a log
//! directory is configured, a daily-rolling file layer written off-thread.

use std::path::PathBuf;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::error::GatewayError;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// HTTP stack crates that are too chatty at the gateway's own levels
const QUIET_TARGETS: &str = "hyper=warn,h2=warn,reqwest=warn,tokio=warn";

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Directory for log files; no file layer when unset
    pub log_dir: Option<PathBuf>,
    /// Prefix of the daily log files
    pub file_name: String,
    /// Filter directive for file output
    pub file_log_level: String,
    /// Filter directive for console output
    pub console_log_level: String,
    pub console_enabled: bool,
    /// JSON lines instead of plain text in the file layer
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            file_name: "ai-gateway.log".to_string(),
            file_log_level: "info".to_string(),
            console_log_level: "warn".to_string(),
            console_enabled: true,
            json_format: true,
        }
    }
}

impl LoggingConfig {
    /// Create logging configuration from `GATEWAY_LOG_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(log_dir) = std::env::var("GATEWAY_LOG_DIR") {
            config.log_dir = Some(PathBuf::from(log_dir));
        }
        if let Ok(file_name) = std::env::var("GATEWAY_LOG_FILE") {
            config.file_name = file_name;
        }
        if let Ok(level) = std::env::var("GATEWAY_LOG_LEVEL") {
            config.file_log_level = level;
        }
        if let Ok(level) = std::env::var("GATEWAY_LOG_CONSOLE_LEVEL") {
            config.console_log_level = level;
        }
        if let Ok(enabled) = std::env::var("GATEWAY_LOG_CONSOLE") {
            config.console_enabled = enabled.parse().unwrap_or(true);
        }
        if let Ok(json) = std::env::var("GATEWAY_LOG_JSON") {
            config.json_format = json.parse().unwrap_or(true);
        }

        config
    }

    pub fn with_log_dir<P: Into<PathBuf>>(mut self, log_dir: P) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }
}

/// Keeps the background file writer alive; flushes on drop
#[derive(Debug)]
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// `level` plus the quiet-target directives, falling back to `fallback` if `level` is invalid
fn build_filter(level: &str, fallback: &str) -> EnvFilter {
    EnvFilter::try_new(format!("{},{}", level, QUIET_TARGETS))
        .unwrap_or_else(|_| EnvFilter::new(format!("{},{}", fallback, QUIET_TARGETS)))
}

/// Install the global subscriber
///
/// Fails when a global subscriber is already set or the log directory cannot
/// be created.
pub fn init_logging(config: LoggingConfig) -> Result<LoggingGuard, GatewayError> {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut file_guard = None;

    if let Some(log_dir) = &config.log_dir {
        std::fs::create_dir_all(log_dir).map_err(|e| {
            GatewayError::configuration(format!("Failed to create log directory: {}", e))
        })?;

        let appender = tracing_appender::rolling::daily(log_dir, &config.file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);

        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(ChronoUtc::new("%Y-%m-%d %H:%M:%S%.3f UTC".to_string()))
            .with_file(true)
            .with_line_number(true)
            .with_target(true);
        let filter = build_filter(&config.file_log_level, "info");

        layers.push(if config.json_format {
            file_layer
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_filter(filter)
                .boxed()
        } else {
            file_layer.with_filter(filter).boxed()
        });
    }

    if config.console_enabled {
        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_span_events(FmtSpan::NONE)
            .with_target(true)
            .with_filter(build_filter(&config.console_log_level, "warn"));
        layers.push(console_layer.boxed());
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| GatewayError::configuration(format!("Failed to install logging: {}", e)))?;

    info!(
        log_dir = ?config.log_dir,
        json_format = config.json_format,
        console = config.console_enabled,
        "Logging initialized"
    );

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_logs_to_console_only() {
        let config = LoggingConfig::default();
        assert!(config.log_dir.is_none());
        assert!(config.console_enabled);
        assert_eq!(config.console_log_level, "warn");

        let config = config.with_log_dir("/tmp/gateway-logs");
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/gateway-logs")));
    }

    #[test]
    fn test_filter_falls_back_on_bad_directive() {
        let filter = build_filter("ai_gateway=debug", "info");
        assert!(filter.to_string().contains("ai_gateway=debug"));

        let filter = build_filter("not a [valid directive", "info");
        assert!(filter.to_string().contains("hyper=warn"));
    }
}
