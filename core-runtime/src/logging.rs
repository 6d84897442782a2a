//! # Logging & Tracing Infrastructure
//!
//! Provides structured logging with the `tracing` crate, supporting:
//! - JSON, pretty-print and compact output formats
//! - Module-level filtering, with a separate level for the scheduling core's
//!   own messages (target `core`)
//! - Integration with host logging via `LoggerSink`
//!
//! ## Overview
//!
//! This module configures the `tracing-subscriber` infrastructure. When a
//! sink is configured, every event that survives filtering is mirrored to the
//! host logger while still flowing through the standard `tracing` layers.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::logging::{LoggingConfig, LogFormat, init_logging};
//! use bridge_traits::time::{LogLevel, ConsoleLogger};
//! use std::sync::Arc;
//!
//! #[core_async::main]
//! async fn main() {
//!     let config = LoggingConfig::default()
//!         .with_format(LogFormat::Pretty)
//!         .with_level(LogLevel::Debug)
//!         .with_core_level(LogLevel::Warn)
//!         .with_logger_sink(Arc::new(ConsoleLogger::default()));
//!
//!     init_logging(config).expect("Failed to initialize logging");
//!
//!     tracing::info!("Host started");
//! }
//! ```
//!
//! ## LoggerSink integration
//!
//! Provide a custom `LoggerSink` to mirror log events into a host-specific
//! pipeline (browser console, `os_log`). The sink receives structured
//! [`LogEntry`](bridge_traits::time::LogEntry) instances with the original
//! message plus any fields emitted on the event, such as `session` and
//! `kind`.

use crate::error::{Error, Result};

use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};
use core_async::runtime;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::format::FmtSpan,
    layer::{Context, Layered, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    Layer, Registry,
};

/// Target used when re-emitting the scheduling core's console messages.
pub const CORE_TARGET: &str = "core";

/// Workspace crates that receive the configured level by default.
const HOST_CRATES: &[&str] = &[
    "mp4_media_stream",
    "core_runtime",
    "core_playback",
    "core_ffi",
    "bridge_desktop",
];

/// How events are rendered on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored; the debug-build default.
    Pretty,
    /// One JSON object per event; the release-build default.
    Json,
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// Subscriber settings for [`init_logging`].
///
/// Deserialisable so hosts can keep it next to their
/// [`PlaybackConfig`](crate::config::PlaybackConfig); the logger sink can
/// only be attached in code.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Level for the workspace crates. Dependencies log at `warn`.
    pub level: LogLevel,
    /// Level for messages the scheduling core logs itself.
    pub core_level: LogLevel,
    /// Full `EnvFilter` directive string, replacing the generated one.
    pub filter: Option<String>,
    #[serde(skip)]
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    pub enable_spans: bool,
    pub display_target: bool,
    pub display_thread_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            core_level: LogLevel::Info,
            filter: None,
            logger_sink: None,
            enable_spans: true,
            display_target: true,
            display_thread_info: false,
        }
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("core_level", &self.core_level)
            .field("filter", &self.filter)
            .field("logger_sink", &self.logger_sink.is_some())
            .finish_non_exhaustive()
    }
}

impl LoggingConfig {
    pub fn with_format(self, format: LogFormat) -> Self {
        Self { format, ..self }
    }

    pub fn with_level(self, level: LogLevel) -> Self {
        Self { level, ..self }
    }

    pub fn with_core_level(self, core_level: LogLevel) -> Self {
        Self { core_level, ..self }
    }

    pub fn with_filter(self, filter: impl Into<String>) -> Self {
        Self {
            filter: Some(filter.into()),
            ..self
        }
    }

    /// Mirror every event that passes the filter into `sink`.
    pub fn with_logger_sink(self, sink: Arc<dyn LoggerSink>) -> Self {
        Self {
            logger_sink: Some(sink),
            ..self
        }
    }

    pub fn with_spans(self, enable_spans: bool) -> Self {
        Self {
            enable_spans,
            ..self
        }
    }

    pub fn with_target(self, display_target: bool) -> Self {
        Self {
            display_target,
            ..self
        }
    }

    pub fn with_thread_info(self, display_thread_info: bool) -> Self {
        Self {
            display_thread_info,
            ..self
        }
    }
}

/// Install the global subscriber described by `config`.
///
/// Call once at host startup. The filter is validated before anything is
/// installed, so a bad filter string leaves logging untouched.
///
/// # Errors
///
/// - [`Error::Config`] if the filter string does not parse
/// - [`Error::LoggingInit`] if a global subscriber is already installed
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;
    let output = output_layer(&config);

    tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .with(LoggerSinkLayer::new(config.logger_sink))
        .try_init()
        .map_err(|e| Error::LoggingInit(e.to_string()))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directives = match &config.filter {
        Some(custom) => custom.clone(),
        None => {
            // Dependencies stay at warn.
            let host = HOST_CRATES
                .iter()
                .map(|krate| format!("{krate}={}", config.level));
            std::iter::once("warn".to_string())
                .chain(host)
                .chain(std::iter::once(format!("{CORE_TARGET}={}", config.core_level)))
                .collect::<Vec<_>>()
                .join(",")
        }
    };

    EnvFilter::try_new(&directives)
        .map_err(|e| Error::Config(format!("Invalid log filter {directives:?}: {e}")))
}

type Filtered = Layered<EnvFilter, Registry>;

/// The stdout formatter for the configured [`LogFormat`].
fn output_layer(config: &LoggingConfig) -> Box<dyn Layer<Filtered> + Send + Sync> {
    let base = tracing_subscriber::fmt::layer()
        .with_target(config.display_target)
        .with_thread_ids(config.display_thread_info)
        .with_thread_names(config.display_thread_info)
        .with_writer(io::stdout);

    match config.format {
        LogFormat::Pretty => {
            let spans = if config.enable_spans {
                FmtSpan::ACTIVE
            } else {
                FmtSpan::NONE
            };
            base.pretty().with_span_events(spans).boxed()
        }
        LogFormat::Json => base
            .json()
            .flatten_event(true)
            .with_current_span(config.enable_spans)
            .with_span_list(config.enable_spans)
            .boxed(),
        LogFormat::Compact => base.compact().boxed(),
    }
}

/// Layer mirroring every event that passes the filter into a host
/// [`LoggerSink`].
///
/// Inside a Tokio runtime the sink is driven on a spawned task; outside one
/// it is driven to completion in place.
pub struct LoggerSinkLayer {
    sink: Option<Arc<dyn LoggerSink>>,
}

impl LoggerSinkLayer {
    pub fn new(sink: Option<Arc<dyn LoggerSink>>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for LoggerSinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(sink) = &self.sink else {
            return;
        };

        let metadata = event.metadata();
        let level = log_level(metadata.level());
        if level < sink.min_level() {
            return;
        }

        let mut fields = EntryFields::default();
        event.record(&mut fields);

        let message = fields
            .message
            .take()
            .unwrap_or_else(|| metadata.name().to_string());
        let mut entry = LogEntry::new(level, metadata.target(), message);
        entry.fields = fields.values;
        entry.span = ctx.lookup_current().map(|span| span.name().to_string());

        let sink = Arc::clone(sink);
        let deliver = async move {
            if let Err(e) = sink.log(entry).await {
                eprintln!("LoggerSink error: {e}");
            }
        };
        match runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(deliver);
            }
            Err(_) => runtime::block_on(deliver),
        }
    }
}

/// Collects an event's fields as strings; `message` is kept apart.
#[derive(Default)]
struct EntryFields {
    message: Option<String>,
    values: BTreeMap<String, String>,
}

impl Visit for EntryFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, format!("{value:?}"));
    }
}

impl EntryFields {
    fn insert(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = Some(value),
            name => {
                self.values.insert(name.to_string(), value);
            }
        }
    }
}

fn log_level(level: &Level) -> LogLevel {
    match *level {
        Level::TRACE => LogLevel::Trace,
        Level::DEBUG => LogLevel::Debug,
        Level::INFO => LogLevel::Info,
        Level::WARN => LogLevel::Warn,
        Level::ERROR => LogLevel::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as SinkResult;
    use std::sync::Mutex;

    /// Sink recording every entry it receives.
    #[derive(Default)]
    struct RecordingSink {
        entries: Mutex<Vec<LogEntry>>,
    }

    #[async_trait]
    impl LoggerSink for RecordingSink {
        async fn log(&self, entry: LogEntry) -> SinkResult<()> {
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }

        fn min_level(&self) -> LogLevel {
            LogLevel::Debug
        }
    }

    #[test]
    fn test_config_from_json_keeps_defaults() {
        let config: LoggingConfig =
            serde_json::from_str(r#"{"format": "compact", "core_level": "warn"}"#).unwrap();

        assert_eq!(config.format, LogFormat::Compact);
        assert_eq!(config.core_level, LogLevel::Warn);
        assert_eq!(config.level, LogLevel::Info);
        assert!(config.enable_spans);
        assert!(config.logger_sink.is_none());
    }

    #[test]
    fn test_generated_filter_covers_host_crates_and_core() {
        let config = LoggingConfig::default()
            .with_level(LogLevel::Debug)
            .with_core_level(LogLevel::Error);
        let filter = build_filter(&config).unwrap().to_string();

        for krate in HOST_CRATES {
            assert!(filter.contains(&format!("{krate}=debug")), "{filter}");
        }
        assert!(filter.contains("core=error"));
    }

    #[test]
    fn test_custom_filter_replaces_generated_one() {
        let config = LoggingConfig::default().with_filter("core_playback=trace");
        let filter = build_filter(&config).unwrap().to_string();

        assert!(filter.contains("core_playback=trace"));
        assert!(!filter.contains("core_ffi"));
    }

    #[test]
    fn test_invalid_filter_is_config_error() {
        let config = LoggingConfig::default().with_filter("core_playback=notalevel");
        assert!(matches!(build_filter(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_sink_layer_mirrors_fields_and_span() {
        let sink = Arc::new(RecordingSink::default());
        let subscriber = tracing_subscriber::registry()
            .with(LoggerSinkLayer::new(Some(sink.clone() as Arc<dyn LoggerSink>)));
        let _guard = tracing::subscriber::set_default(subscriber);

        tracing::info_span!("stop").in_scope(|| {
            tracing::info!(target: CORE_TARGET, session = 4u32, kind = "audio", "demuxed moov");
        });
        tracing::trace!("below the sink's level");

        let entries = sink.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.target, "core");
        assert_eq!(entry.message, "demuxed moov");
        assert_eq!(entry.span.as_deref(), Some("stop"));
        assert_eq!(entry.fields.get("session").map(String::as_str), Some("4"));
        assert_eq!(entry.fields.get("kind").map(String::as_str), Some("audio"));
    }
}
