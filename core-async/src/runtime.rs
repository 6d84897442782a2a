//! Runtime entry points.
//!
//! Everything in the coordination layer is `!Send` (shared state lives in
//! `Rc`/`RefCell`), so futures are driven on a current-thread Tokio runtime
//! inside a [`LocalSet`]. [`block_on_local`] is what `#[core_async::main]`
//! and `#[core_async::test]` expand to.

pub use tokio::runtime::{Builder, Handle, Runtime};
pub use tokio::task::LocalSet;

/// Runs the provided future to completion on a fresh current-thread runtime.
pub fn block_on<F>(future: F) -> F::Output
where
    F: std::future::Future,
{
    current_thread().block_on(future)
}

/// Runs the provided future to completion inside a [`LocalSet`], so it may
/// call [`crate::task::spawn_local`].
///
/// Local tasks still pending when `future` resolves are dropped together
/// with the `LocalSet`.
pub fn block_on_local<F>(future: F) -> F::Output
where
    F: std::future::Future,
{
    let runtime = current_thread();
    let local = LocalSet::new();
    local.block_on(&runtime, future)
}

fn current_thread() -> Runtime {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("core_async::runtime: failed to build Tokio runtime")
}
