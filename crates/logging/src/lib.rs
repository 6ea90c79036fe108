//! Logging setup for the DI model copier
//!
//! Installs a `tracing` subscriber writing to stderr and, when a directory
//! is configured, to a daily rolling file.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use common::error::{Error, Result};
use settings::LoggingSettings;

/// File name prefix of rolling log files
pub const LOG_FILE_PREFIX: &str = "di-model-copier.log";

/// Keeps the file writer alive; flushes on drop
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Builds the filter, letting `RUST_LOG` win over the configured level
pub fn build_filter(settings: &LoggingSettings) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&settings.level)
            .map_err(|e| Error::Config(format!("Invalid logging.level '{}': {}", settings.level, e))),
    }
}

/// Initializes the global subscriber
pub fn init(settings: &LoggingSettings) -> Result<LoggingGuard> {
    let filter = build_filter(settings)?;

    let stderr_layer = if settings.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, file_guard) = match &settings.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to initialize logging: {}", e)))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_rejects_garbage_level() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }

        let settings = LoggingSettings {
            level: "copier=notalevel".to_string(),
            ..Default::default()
        };
        assert!(build_filter(&settings).is_err());

        let settings = LoggingSettings {
            level: "debug,reqwest=warn".to_string(),
            ..Default::default()
        };
        assert!(build_filter(&settings).is_ok());
    }
}
