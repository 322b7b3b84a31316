//! Tracing subscriber setup.

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps the non-blocking file writer flushing; drop it on shutdown.
#[derive(Debug, Default)]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Initialize logging: stdout plus an optional rolling file appender.
///
/// Filter precedence is `logging.level`, then `RUST_LOG`, then "info".
/// Calling this more than once keeps the first subscriber.
pub fn init_with_config(cfg: &LoggingConfig) -> LoggingGuard {
    let mut layers: Vec<BoxedLayer> = vec![format_layer(cfg.format, true, std::io::stdout)];
    let mut guard = LoggingGuard::default();

    if cfg.enable_file_logging {
        if let Some((writer, file_guard)) = file_writer(cfg) {
            layers.push(format_layer(cfg.format, false, writer));
            guard._file = Some(file_guard);
        }
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(env_filter(cfg))
        .try_init();

    guard
}

fn env_filter(cfg: &LoggingConfig) -> EnvFilter {
    match &cfg.level {
        Some(level) => EnvFilter::new(level.as_str()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

fn format_layer<W>(format: LogFormat, ansi: bool, writer: W) -> BoxedLayer
where
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_writer(writer);

    match format {
        LogFormat::Json => layer.json().with_ansi(false).boxed(),
        LogFormat::Text => layer.with_ansi(ansi).boxed(),
    }
}

fn rotation(name: &str) -> Rotation {
    match name.trim().to_ascii_lowercase().as_str() {
        "minutely" => Rotation::MINUTELY,
        "hourly" => Rotation::HOURLY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

fn file_writer(cfg: &LoggingConfig) -> Option<(NonBlocking, WorkerGuard)> {
    if let Err(e) = std::fs::create_dir_all(&cfg.dir) {
        eprintln!(
            "Failed to create log directory '{}' ({e}), continuing with stdout logs",
            cfg.dir
        );
        return None;
    }

    let appender = RollingFileAppender::new(rotation(&cfg.rotation), &cfg.dir, &cfg.filename);
    Some(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn rotation_names() {
        assert_eq!(rotation("hourly"), Rotation::HOURLY);
        assert_eq!(rotation(" Never "), Rotation::NEVER);
        assert_eq!(rotation("minutely"), Rotation::MINUTELY);
        assert_eq!(rotation("daily"), Rotation::DAILY);
        assert_eq!(rotation("something-else"), Rotation::DAILY);
    }

    #[test]
    fn explicit_level_wins() {
        let cfg = LoggingConfig {
            level: Some(LogLevel::Warn),
            ..LoggingConfig::default()
        };
        assert_eq!(
            env_filter(&cfg).max_level_hint(),
            Some(tracing_subscriber::filter::LevelFilter::WARN)
        );
    }

    #[test]
    fn file_logging_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("nested").join("logs");
        let cfg = LoggingConfig {
            dir: log_dir.to_string_lossy().into_owned(),
            enable_file_logging: true,
            ..LoggingConfig::default()
        };
        let writer = file_writer(&cfg);
        assert!(writer.is_some());
        assert!(log_dir.is_dir());
    }
}
