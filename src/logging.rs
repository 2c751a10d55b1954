//! Logging Setup
//!
//! Structured logging through the `log` facade with text or JSON output
//! and console or file destinations. Embedding applications that already
//! install their own logger simply skip `init_logger`.

use log::{Level, LevelFilter};
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use anyhow::{Context, Result};

/// Log output format options
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: {}. Valid options: text, json", s)),
        }
    }
}

/// Log destination options
#[derive(Debug, Clone, PartialEq)]
pub enum LogDestination {
    Console,
    File(PathBuf),
}

/// JSON log entry structure
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonLogEntry {
    pub timestamp: String,
    pub level: String,
    pub message: String,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LevelFilter,
    pub format: LogFormat,
    pub destination: LogDestination,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            format: LogFormat::Text,
            destination: LogDestination::Console,
        }
    }
}

/// Logger installed behind the `log` facade
pub struct EngineLogger {
    config: LogConfig,
}

impl EngineLogger {
    pub fn new(config: LogConfig) -> Self {
        Self { config }
    }

    fn format_timestamp() -> String {
        let now: DateTime<Local> = Local::now();
        now.format("%Y-%m-%d %H:%M:%S").to_string()
    }

    fn format_text_message(&self, level: Level, message: &str) -> String {
        format!(
            "{} [{}] {}",
            Self::format_timestamp(),
            level.to_string().to_uppercase(),
            message
        )
    }

    fn format_json_message(&self, level: Level, message: &str) -> Result<String> {
        let entry = JsonLogEntry {
            timestamp: Self::format_timestamp(),
            level: level.to_string().to_uppercase(),
            message: message.to_string(),
        };
        serde_json::to_string(&entry).context("Failed to serialize log entry to JSON")
    }

    fn write_to_console(&self, formatted_message: &str) {
        let _ = writeln!(io::stderr(), "{}", formatted_message);
    }

    fn write_to_file(&self, formatted_message: &str, file_path: &PathBuf) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)
            .with_context(|| format!("Failed to open log file: {}", file_path.display()))?;
        writeln!(file, "{}", formatted_message).context("Failed to write to log file")
    }
}

impl log::Log for EngineLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.config.level
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let message = record.args().to_string();
        let level = record.level();

        let formatted_message = match self.config.format {
            LogFormat::Text => self.format_text_message(level, &message),
            LogFormat::Json => match self.format_json_message(level, &message) {
                Ok(json) => json,
                Err(e) => {
                    eprintln!("JSON formatting error: {}. Falling back to text format.", e);
                    self.format_text_message(level, &message)
                }
            },
        };

        match &self.config.destination {
            LogDestination::Console => self.write_to_console(&formatted_message),
            LogDestination::File(path) => {
                if let Err(e) = self.write_to_file(&formatted_message, path) {
                    eprintln!("File logging error: {}. Falling back to console.", e);
                    self.write_to_console(&formatted_message);
                }
            }
        }
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

/// Initialize the logging system with the given configuration
pub fn init_logger(config: LogConfig) -> Result<()> {
    let max_level = config.level;
    let logger = EngineLogger::new(config);

    log::set_boxed_logger(Box::new(logger)).context("Failed to set global logger")?;
    log::set_max_level(max_level);

    Ok(())
}

/// Convert string to LevelFilter
pub fn parse_log_level(level_str: &str) -> Result<LevelFilter> {
    match level_str.to_lowercase().as_str() {
        "error" => Ok(LevelFilter::Error),
        "warn" => Ok(LevelFilter::Warn),
        "info" => Ok(LevelFilter::Info),
        "debug" => Ok(LevelFilter::Debug),
        "trace" => Ok(LevelFilter::Trace),
        "off" => Ok(LevelFilter::Off),
        _ => Err(anyhow::anyhow!(
            "Invalid log level: {}. Valid levels: error, warn, info, debug, trace, off",
            level_str
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("invalid".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(parse_log_level("error").unwrap(), LevelFilter::Error);
        assert_eq!(parse_log_level("INFO").unwrap(), LevelFilter::Info);
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_text_message_formatting() {
        let logger = EngineLogger::new(LogConfig::default());
        let formatted = logger.format_text_message(Level::Info, "Engine started");
        assert!(formatted.contains("[INFO]"));
        assert!(formatted.contains("Engine started"));
    }

    #[test]
    fn test_json_message_formatting() {
        let logger = EngineLogger::new(LogConfig::default());
        let formatted = logger
            .format_json_message(Level::Warn, "Retry abandoned")
            .unwrap();
        assert!(formatted.contains(r#""level":"WARN""#));
        assert!(formatted.contains(r#""message":"Retry abandoned""#));
    }
}
