//! Global subscriber installation.
//!
//! Only one global subscriber can exist per process, so everything that
//! installs one lives in a single test.

use std::sync::Arc;

use bridge_traits::time::{ConsoleLogger, LogLevel};
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig, CORE_TARGET};
use core_runtime::Error;

#[test]
fn test_logging_initializes_once() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_logger_sink(Arc::new(ConsoleLogger {
            min_level: LogLevel::Warn,
        }));

    // A bad filter is rejected before anything is installed.
    let invalid = config.clone().with_filter("core_playback=loud");
    assert!(matches!(init_logging(invalid), Err(Error::Config(_))));

    init_logging(config.clone()).unwrap();
    tracing::info!(target: CORE_TARGET, "logging initialized");
    tracing::warn!(session = 1u32, "mirrored to the console sink");

    assert!(matches!(init_logging(config), Err(Error::LoggingInit(_))));
}

#[test]
fn test_format_defaults_follow_build_profile() {
    let expected = if cfg!(debug_assertions) {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    };
    assert_eq!(LoggingConfig::default().format, expected);
}
