//! Async substrate for the media stream host.
//!
//! The coordination layer is single-threaded and cooperative: command
//! handlers, decoder callbacks and session teardown all run as local tasks
//! on one thread, interleaving only at `.await` points. This crate wraps the
//! Tokio primitives that model that environment so the other workspace
//! crates never depend on Tokio directly.
//!
//! # Modules
//!
//! - `task`: local task spawning (`spawn_local`) and cooperative yielding
//! - `time`: timers used to serve the core's `sleep` requests
//! - `sync`: channels (broadcast, mpsc, oneshot)
//! - `runtime`: entry points that drive a future inside a `LocalSet`
//! - `future`: combinators for awaiting groups of tasks
//!
//! # Examples
//!
//! ```rust
//! use core_async::{runtime, task, time};
//!
//! let value = runtime::block_on_local(async {
//!     let handle = task::spawn_local(async {
//!         time::sleep(time::Duration::from_millis(1)).await;
//!         42
//!     });
//!     handle.await.unwrap()
//! });
//! assert_eq!(value, 42);
//! ```

// Re-export the async entry-point/test macros so downstream crates never need
// direct Tokio dependencies.
pub use core_async_macros::{main, test};

pub mod future;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use task::{spawn_local, yield_now};
pub use time::{sleep, Duration, Instant};
