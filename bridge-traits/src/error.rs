use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Unsupported decoder configuration: {0}")]
    Unsupported(String),

    #[error("Invalid decoder state: {0}")]
    InvalidState(String),

    /// Cut short by a concurrent close.
    #[error("Operation aborted: {0}")]
    Aborted(String),

    #[error("Decoding failed: {0}")]
    DecodeFailed(String),

    #[error("Output sink is closed")]
    SinkClosed,

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),
}

impl BridgeError {
    /// Returns `true` for abort-class errors raised when a flush or close
    /// races another close.
    pub fn is_abort(&self) -> bool {
        matches!(self, BridgeError::Aborted(_))
    }

    /// Returns `true` when the consumer side of a sink has gone away.
    pub fn is_sink_closed(&self) -> bool {
        matches!(self, BridgeError::SinkClosed)
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
