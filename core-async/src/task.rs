//! Local task spawning.
//!
//! Command handlers must not block the core's call into the host, so each
//! one schedules its asynchronous part with [`spawn_local`] and returns
//! immediately. All spawned tasks share the calling thread.
//!
//! `spawn_local` must be called from within a [`LocalSet`](tokio::task::LocalSet)
//! context, e.g. under [`crate::runtime::block_on_local`].

pub use tokio::task::{yield_now, JoinError, JoinHandle};

/// Spawns a `!Send` future on the current `LocalSet`.
///
/// # Panics
///
/// Panics when called outside a `LocalSet`.
pub fn spawn_local<F>(future: F) -> JoinHandle<F::Output>
where
    F: std::future::Future + 'static,
    F::Output: 'static,
{
    tokio::task::spawn_local(future)
}

/// Result type for task operations.
pub type Result<T> = std::result::Result<T, JoinError>;
