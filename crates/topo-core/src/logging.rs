//! `env_logger` setup driven by the `[logging]` config section.

use std::fs::OpenOptions;
use std::io::Write;

use env_logger::{Builder, Target};
use log::LevelFilter;

use crate::config::{LogLevel, LoggingConfig};
use crate::error::{Result, TopoError};

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warning => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
        }
    }
}

/// Install the global logger. `RUST_LOG`, when set, overrides the
/// configured level. Records are written as `LEVEL message`.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let mut builder = Builder::new();
    builder
        .filter_level(config.log_level.into())
        .parse_default_env()
        .format(|buf, record| writeln!(buf, "{:<5} {}", record.level(), record.args()));

    if let Some(path) = &config.log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| TopoError::io(path, e))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.try_init().map_err(|e| TopoError::Logging(e.to_string()))
}
