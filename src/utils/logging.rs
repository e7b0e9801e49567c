use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Mutex, Once};
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{format::FmtSpan, writer::BoxMakeWriter},
    EnvFilter,
};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Logging configuration options
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level
    pub level: Level,
    /// Whether to include timestamps
    pub timestamps: bool,
    /// Whether to include source code locations
    pub source_location: bool,
    /// Whether to log span close events
    pub log_spans: bool,
    /// Output file path (None for stderr)
    pub file_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            timestamps: true,
            source_location: false,
            log_spans: false,
            file_path: None,
        }
    }
}

impl From<&LoggingConfig> for LogConfig {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            level: config.level.as_level(),
            timestamps: config.timestamps,
            file_path: config.file_path.clone(),
            ..Self::default()
        }
    }
}

/// Initialize logging system. Only the first call installs a subscriber.
pub fn setup_logging(config: LogConfig) -> Result<(), String> {
    let mut result = Ok(());

    INIT.call_once(|| {
        result = setup_logging_internal(config);
    });

    result
}

fn setup_logging_internal(config: LogConfig) -> Result<(), String> {
    let filter = EnvFilter::from_default_env()
        .add_directive(LevelFilter::from_level(config.level).into());

    // Stdout belongs to the chat transcript
    let writer = match &config.file_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| format!("Failed to open log file: {}", e))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(config.source_location)
        .with_line_number(config.source_location)
        .with_ansi(config.file_path.is_none())
        .with_span_events(if config.log_spans {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .with_writer(writer);

    let installed = if config.timestamps {
        builder.try_init()
    } else {
        builder.without_time().try_init()
    };

    installed.map_err(|e| format!("Failed to set global subscriber: {}", e))
}
