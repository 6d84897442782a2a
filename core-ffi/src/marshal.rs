//! JSON marshaling across the shared-memory boundary.
//!
//! Ownership rule: whichever side did not allocate a region frees it,
//! exactly once, right after consuming it. [`SharedMemory::decode`] therefore
//! always frees the region it reads, even when parsing fails.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{FfiError, Result};
use crate::memory::{Handle, SharedMemory};

/// Failure half of the result envelope the core returns from fallible
/// exports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreFailure {
    pub message: String,
}

impl CoreFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for CoreFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl SharedMemory {
    /// Serialize `value` into a freshly allocated region.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Handle> {
        let bytes = serde_json::to_vec(value)?;
        Ok(self.allocate_bytes(&bytes))
    }

    /// Parse the region behind `handle` and free it.
    pub fn decode<T: DeserializeOwned>(&self, handle: Handle) -> Result<T> {
        let bytes = self.take(handle)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Parse a `{"Ok": value}` / `{"Err": {"message": ..}}` envelope and free
    /// it. An `Err` envelope becomes [`FfiError::Core`].
    pub fn decode_result<T: DeserializeOwned>(&self, handle: Handle) -> Result<T> {
        let envelope: std::result::Result<T, CoreFailure> = self.decode(handle)?;
        envelope.map_err(|failure| FfiError::Core(failure.message))
    }

    /// Write a result envelope. The counterpart of [`decode_result`](Self::decode_result)
    /// used by the core side.
    pub fn encode_result<T: Serialize>(
        &self,
        result: std::result::Result<&T, &CoreFailure>,
    ) -> Result<Handle> {
        self.encode(&result)
    }
}
