//! Time and Logging Abstractions
//!
//! Provides the injectable time source served to the core and the logging
//! sink used to forward structured logs to the host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use crate::error::Result;

/// Monotonic time source.
///
/// The core asks the host for the current time in milliseconds as a float
/// and only ever compares readings against each other, so the origin is
/// arbitrary. Implementations must never go backwards.
pub trait Clock: Send + Sync {
    /// Milliseconds elapsed since the clock's origin.
    fn now_millis(&self) -> f64;
}

/// Clock backed by [`Instant`], with its origin at construction time.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Severity of a [`LogEntry`], ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Lowercase name, as accepted by `tracing` filter directives.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One log event as handed to a [`LoggerSink`].
///
/// `fields` holds the structured fields recorded on the event (`session`,
/// `kind`, `token`, ...) rendered as strings, in key order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    pub target: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    /// Name of the innermost span the event was recorded in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            target: target.into(),
            message: message.into(),
            fields: BTreeMap::new(),
            span: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }
}

impl fmt::Display for LogEntry {
    /// `2024-05-01T10:00:00.000Z  INFO core: message session=1 kind=audio`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:>5} {}: {}",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.level.as_str().to_uppercase(),
            self.target,
            self.message
        )?;
        for (key, value) in &self.fields {
            write!(f, " {key}={value}")?;
        }
        Ok(())
    }
}

/// Destination for log events mirrored out of the `tracing` pipeline.
///
/// Hosts use it to reach their own logging (a browser console, `os_log`, a
/// file). It is installed into the global subscriber, so unlike the media
/// traits it must be `Send + Sync`.
///
/// ```ignore
/// use bridge_traits::time::{LoggerSink, LogEntry, LogLevel};
///
/// async fn report(logger: &dyn LoggerSink, session: u32) {
///     let entry = LogEntry::new(LogLevel::Error, "core_playback", "decoder failed")
///         .with_field("session", session.to_string());
///     logger.log(entry).await.ok();
/// }
/// ```
#[async_trait::async_trait]
pub trait LoggerSink: Send + Sync {
    async fn log(&self, entry: LogEntry) -> Result<()>;

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Entries below this level are dropped before they reach the sink.
    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}

/// Sink that prints one line per entry to standard error.
#[derive(Debug, Clone)]
pub struct ConsoleLogger {
    pub min_level: LogLevel,
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
        }
    }
}

#[async_trait::async_trait]
impl LoggerSink for ConsoleLogger {
    async fn log(&self, entry: LogEntry) -> Result<()> {
        if entry.level >= self.min_level {
            eprintln!("{entry}");
        }
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now_millis();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = clock.now_millis();

        assert!(first >= 0.0);
        assert!(second > first);
    }

    #[test]
    fn test_log_entry_line() {
        let entry = LogEntry::new(LogLevel::Warn, "core_playback", "sink close failed")
            .with_field("session", "1")
            .with_field("kind", "audio")
            .with_span("stop");

        assert_eq!(entry.span.as_deref(), Some("stop"));
        let line = entry.to_string();
        assert!(line.ends_with(" WARN core_playback: sink close failed kind=audio session=1"));
    }

    #[test]
    fn test_levels_order_and_names() {
        assert!(LogLevel::Trace < LogLevel::Error);
        assert_eq!(LogLevel::Warn.to_string(), "warn");
        assert_eq!(
            serde_json::to_string(&LogLevel::Debug).unwrap(),
            "\"debug\""
        );
    }

    #[core_async::test]
    async fn test_console_logger_filters_by_level() {
        let logger = ConsoleLogger {
            min_level: LogLevel::Error,
        };
        assert_eq!(logger.min_level(), LogLevel::Error);
        logger
            .log(LogEntry::new(LogLevel::Info, "core", "below threshold"))
            .await
            .unwrap();
    }
}
