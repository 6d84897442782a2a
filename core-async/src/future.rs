//! Future combinators.
//!
//! Re-exported from `futures` so callers that await whole batches of local
//! tasks (draining in-flight commands, joining concurrent close routines)
//! do not depend on it directly.

pub use futures::future::{join, join_all};
