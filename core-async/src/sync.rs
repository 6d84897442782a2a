//! Synchronization primitives.
//!
//! Only channels are needed: the coordination layer is single-threaded, so
//! shared state is plain `Rc<RefCell<_>>` and never held across an await.
//!
//! - `broadcast`: lifecycle event fan-out
//! - `mpsc`: decoded video frames from a session to its consumer
//! - `oneshot`: one-time completion signals

pub use tokio::sync::{broadcast, mpsc, oneshot};
