//! # Core Boundary
//!
//! Everything that crosses between the host and the scheduling core.
//!
//! - [`memory`]: the shared linear memory and its region handles
//! - [`marshal`]: JSON encoding of structured values into regions, plus the
//!   `Ok`/`Err` result envelope the core uses for fallible exports
//! - [`command`]: the traits both sides implement, decoder kinds, response
//!   tokens and the forward-declared [`HostRef`]
//!
//! ## Ownership
//!
//! A region is freed by the side that did not allocate it, exactly once,
//! right after it has been consumed. `SharedMemory::decode` frees what it
//! reads, so decoding the same handle twice fails with
//! [`FfiError::InvalidHandle`].
//!
//! ```
//! use core_ffi::SharedMemory;
//!
//! let memory = SharedMemory::new();
//! let handle = memory.encode(&serde_json::json!({"repeat": true})).unwrap();
//! let value: serde_json::Value = memory.decode(handle).unwrap();
//! assert_eq!(value["repeat"], true);
//! assert!(memory.decode::<serde_json::Value>(handle).is_err());
//! ```

pub mod command;
pub mod error;
pub mod marshal;
pub mod memory;

#[cfg(feature = "scripted")]
pub mod scripted;

pub use command::{
    CommandHandler, CoreScheduler, DecoderKind, HostRef, PlayOptions, ResponseToken, SessionId,
};
pub use error::{FfiError, Result};
pub use marshal::CoreFailure;
pub use memory::{Handle, SharedMemory};

#[cfg(feature = "scripted")]
pub use scripted::{CoreCall, ScriptedCore};
