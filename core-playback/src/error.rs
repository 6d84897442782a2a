//! # Playback Error Types
//!
//! Errors raised by the engine, its sessions and the render path.
//!
//! Failures fall into a handful of classes that callers treat differently:
//! capability errors stop a load, protocol violations indicate a bug on one
//! side of the core boundary, and decoder or sink failures end the session
//! they happened in. Races with `stop` are never errors.

use bridge_traits::BridgeError;
use core_ffi::{DecoderKind, FfiError, ResponseToken, SessionId};
use thiserror::Error;

/// Errors that can occur while loading or playing a container.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Capability Errors
    // ========================================================================
    /// The host platform cannot decode a configuration from the container.
    #[error("Unsupported {kind} decoder configuration: {config}")]
    UnsupportedConfiguration { kind: DecoderKind, config: String },

    /// Host configuration was rejected.
    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    #[error("No container has been loaded")]
    NotLoaded,

    #[error("A container is already loaded")]
    AlreadyLoaded,

    // ========================================================================
    // Protocol Violations
    // ========================================================================
    /// The core issued a command with a token that is still awaiting its
    /// answer.
    #[error("Response token {0} is already outstanding")]
    TokenReused(ResponseToken),

    /// The core sent a chunk for a decoder it never asked to create.
    #[error("Session {session} has no {kind} decoder")]
    MissingDecoder {
        session: SessionId,
        kind: DecoderKind,
    },

    /// A handler tried to call into the core while a core call was running.
    #[error("Core called while a previous core call is still in progress")]
    ReentrantCore,

    /// Marshaling across the core boundary failed, or the core reported an
    /// error through a result envelope.
    #[error("Core boundary error: {0}")]
    Boundary(#[from] FfiError),

    // ========================================================================
    // Runtime Errors
    // ========================================================================
    /// Capability query or decoder construction failed.
    #[error("Platform error: {0}")]
    Platform(BridgeError),

    /// A live decoder failed.
    #[error("Decoder error: {0}")]
    Decoder(BridgeError),

    /// Writing decoded output failed.
    #[error("Output sink error: {0}")]
    Sink(BridgeError),

    /// A background command task panicked or was cancelled.
    #[error("Command task failed: {0}")]
    Task(String),
}

impl PlaybackError {
    /// Returns `true` if the host cannot play the content at all.
    pub fn is_capability_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::UnsupportedConfiguration { .. }
                | PlaybackError::Runtime(core_runtime::Error::CapabilityMissing { .. })
        )
    }

    /// Returns `true` for errors that mean the core and the host disagree
    /// about the command contract.
    pub fn is_protocol_violation(&self) -> bool {
        match self {
            PlaybackError::TokenReused(_)
            | PlaybackError::MissingDecoder { .. }
            | PlaybackError::ReentrantCore => true,
            PlaybackError::Boundary(e) => !matches!(e, FfiError::Core(_)),
            _ => false,
        }
    }

    /// Returns `true` for abort-class decoder errors.
    pub fn is_abort(&self) -> bool {
        match self {
            PlaybackError::Decoder(e) | PlaybackError::Platform(e) => e.is_abort(),
            _ => false,
        }
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_classification() {
        let unsupported = PlaybackError::UnsupportedConfiguration {
            kind: DecoderKind::Video,
            config: r#"{"codec":"hev1"}"#.to_string(),
        };
        assert!(unsupported.is_capability_error());
        assert!(!unsupported.is_protocol_violation());
        assert_eq!(
            unsupported.to_string(),
            r#"Unsupported video decoder configuration: {"codec":"hev1"}"#
        );

        let missing = PlaybackError::from(core_runtime::Error::CapabilityMissing {
            capability: "MediaPlatform".into(),
            message: "none".into(),
        });
        assert!(missing.is_capability_error());
    }

    #[test]
    fn test_protocol_violation_classification() {
        assert!(PlaybackError::TokenReused(ResponseToken::new(3)).is_protocol_violation());
        assert!(PlaybackError::MissingDecoder {
            session: 1,
            kind: DecoderKind::Audio
        }
        .is_protocol_violation());
        assert!(PlaybackError::from(FfiError::UnknownDecoderKind(9)).is_protocol_violation());

        // A failure the core reports about the content is not a contract bug.
        assert!(!PlaybackError::from(FfiError::Core("not an mp4".into())).is_protocol_violation());
        assert!(!PlaybackError::Decoder(BridgeError::DecodeFailed("x".into())).is_protocol_violation());
    }

    #[test]
    fn test_abort_classification() {
        assert!(PlaybackError::Decoder(BridgeError::Aborted("closed".into())).is_abort());
        assert!(!PlaybackError::Sink(BridgeError::SinkClosed).is_abort());
    }
}
