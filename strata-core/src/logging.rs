use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Install the global subscriber
///
/// `RUST_LOG` wins over the configured level. Events go to stdout unless
/// `file_path` is set, in which case they are appended without colors.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = parse_log_level(&config.level)?;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let (writer, ansi) = match &config.file_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| anyhow::anyhow!("Failed to open log file {path}: {e}"))?;
            (BoxMakeWriter::new(Arc::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.format == "json" {
        // one flat object per event, membership fields at the top level
        let layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_writer(writer);
        registry.with(layer).try_init()?;
    } else {
        let layer = fmt::layer()
            .compact()
            .with_target(false)
            .with_ansi(ansi)
            .with_writer(writer);
        registry.with(layer).try_init()?;
    }

    Ok(())
}

/// Parse log level string to tracing Level
pub fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("warning").unwrap(), Level::WARN);
        assert_eq!(parse_log_level("error").unwrap(), Level::ERROR);
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_json_events_are_flat_in_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.log");
        let config = LoggingConfig {
            level: "info".to_string(),
            format: "json".to_string(),
            file_path: Some(path.to_str().unwrap().to_string()),
        };

        init_logging(&config).unwrap();
        tracing::info!(active = 3, "Cluster membership");

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains(r#""message":"Cluster membership""#));
        assert!(written.contains(r#""active":3"#));
        assert!(!written.contains(r#""fields""#));
    }
}
