use thiserror::Error;

use crate::memory::Handle;

#[derive(Error, Debug)]
pub enum FfiError {
    /// The handle was never allocated or has already been freed.
    #[error("Invalid or already freed handle: {0}")]
    InvalidHandle(Handle),

    #[error("Range {offset}..{offset}+{length} is outside shared memory of {size} bytes")]
    OutOfBounds {
        offset: usize,
        length: usize,
        size: usize,
    },

    #[error("Malformed boundary payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The core reported a failure through a result envelope.
    #[error("Core error: {0}")]
    Core(String),

    #[error("Unknown decoder kind tag: {0}")]
    UnknownDecoderKind(u8),

    #[error("Host reference is already bound")]
    AlreadyBound,

    #[error("Host reference is not bound or the host was dropped")]
    HostUnavailable,
}

pub type Result<T> = std::result::Result<T, FfiError>;
