//! Tracing subscriber setup
//!
//! Lifecycle code logs through `tracing` with `channel_id`, `session_id` and
//! `recording_id` fields; this module only decides where those events go.

use std::path::Path;

use anyhow::{anyhow, bail, Context};
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Noisy dependencies kept at `warn` unless `RUST_LOG` says otherwise
const QUIET_TARGETS: &[&str] = &["sqlx", "hyper", "reqwest", "opendal"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(format: &str) -> anyhow::Result<Self> {
        match format.trim().to_ascii_lowercase().as_str() {
            "" | "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => bail!("unknown log format {other:?}, expected pretty or json"),
        }
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` wins over the configured level. When `file_path` is set, events
/// go to that file through a non-blocking writer and the returned guard must
/// live until shutdown so buffered lines are flushed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let level = parse_log_level(&config.level)?;
    let format = LogFormat::parse(&config.format)?;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(level))?,
    };
    let registry = tracing_subscriber::registry().with(filter);

    let (writer, guard) = match config.file_path.as_deref().filter(|p| !p.trim().is_empty()) {
        Some(path) => {
            let (writer, guard) = file_writer(Path::new(path))?;
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let layer = fmt::layer().with_target(true).with_line_number(true);
    match (format, writer) {
        (LogFormat::Json, Some(writer)) => registry
            .with(layer.json().with_current_span(true).with_writer(writer))
            .try_init()?,
        (LogFormat::Json, None) => registry.with(layer.json().with_current_span(true)).try_init()?,
        (LogFormat::Pretty, Some(writer)) => registry
            .with(layer.with_ansi(false).with_writer(writer))
            .try_init()?,
        (LogFormat::Pretty, None) => registry.with(layer.pretty()).try_init()?,
    }

    Ok(guard)
}

fn default_directives(level: Level) -> String {
    let mut directives = vec![level.to_string().to_lowercase()];
    if level > Level::WARN {
        directives.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
    }
    directives.join(",")
}

fn file_writer(path: &Path) -> anyhow::Result<(NonBlocking, WorkerGuard)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("log file path {} has no file name", path.display()))?;
    let directory = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(directory)
        .with_context(|| format!("create log directory {}", directory.display()))?;
    Ok(tracing_appender::non_blocking(tracing_appender::rolling::never(
        directory, file_name,
    )))
}

fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow!("invalid log level {level:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level(" Debug ").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("warning").unwrap(), Level::WARN);
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn test_default_directives_quiet_dependencies() {
        assert_eq!(default_directives(Level::WARN), "warn");
        let debug = default_directives(Level::DEBUG);
        assert!(debug.starts_with("debug,"));
        assert!(debug.contains("sqlx=warn"));
    }

    #[test]
    fn test_log_format() {
        assert_eq!(LogFormat::parse("JSON").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::parse("").unwrap(), LogFormat::Pretty);
        assert!(LogFormat::parse("xml").is_err());
    }

    #[test]
    fn test_init_logging_rejects_bad_config() {
        let config = LoggingConfig {
            level: "loud".to_string(),
            ..Default::default()
        };
        assert!(init_logging(&config).is_err());

        let config = LoggingConfig {
            format: "xml".to_string(),
            ..Default::default()
        };
        assert!(init_logging(&config).is_err());
    }
}
