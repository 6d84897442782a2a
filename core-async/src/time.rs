//! Time-related abstractions.
//!
//! The core has no timer of its own: it asks the host to sleep and to report
//! the current time. These re-exports are what the host uses to serve both.

pub use std::time::{Duration, Instant};
pub use tokio::time::{sleep, timeout, Sleep, Timeout};

/// Sleeps for `millis` milliseconds.
///
/// Convenience for the core's `sleep(token, ms)` command, whose duration
/// arrives as an integer millisecond count.
pub async fn sleep_millis(millis: u32) {
    sleep(Duration::from_millis(u64::from(millis))).await
}
