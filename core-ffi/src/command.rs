//! The command contract between the scheduling core and its host.
//!
//! The core is a black box reached through [`CoreScheduler`]. While it runs
//! it calls back into the host through [`CommandHandler`]. Structured
//! arguments travel as [`Handle`]s into [`SharedMemory`].

use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{FfiError, Result};
use crate::memory::{Handle, SharedMemory};

/// Identifier of a playback session, assigned by the host.
pub type SessionId = u32;

/// Token the core hands out with a request it expects an answer to. The host
/// answers through [`CoreScheduler::awake`] or
/// [`CoreScheduler::notify_decoder_kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseToken(u32);

impl ResponseToken {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ResponseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two decoder slots a session has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DecoderKind {
    Audio = 0,
    Video = 1,
}

impl DecoderKind {
    pub const ALL: [DecoderKind; 2] = [DecoderKind::Audio, DecoderKind::Video];

    /// Wire tag of this kind.
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(DecoderKind::Audio),
            1 => Ok(DecoderKind::Video),
            other => Err(FfiError::UnknownDecoderKind(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DecoderKind::Audio => "audio",
            DecoderKind::Video => "video",
        }
    }
}

impl TryFrom<u8> for DecoderKind {
    type Error = FfiError;

    fn try_from(tag: u8) -> Result<Self> {
        Self::from_tag(tag)
    }
}

impl fmt::Display for DecoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options passed to the core when a session starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayOptions {
    /// Restart from the beginning instead of ending the session at end of
    /// stream. Handled entirely by the core.
    #[serde(default)]
    pub repeat: bool,
}

/// Exports of the scheduling core, called by the host.
///
/// Regions the host allocates and passes in (`container`, `options`) are
/// freed by the core. The envelope returned by `load` is freed by the host.
pub trait CoreScheduler {
    /// The memory both sides allocate regions in.
    fn memory(&self) -> SharedMemory;

    /// Parse a container. Returns a result envelope holding the container
    /// info.
    fn load(&mut self, container: Handle) -> Result<Handle>;

    /// Start issuing commands for `session`. `options` is an encoded
    /// [`PlayOptions`].
    fn play(&mut self, session: SessionId, options: Handle) -> Result<()>;

    /// Drop all internal state for `session`.
    fn stop(&mut self, session: SessionId) -> Result<()>;

    /// Resume the scheduling step waiting on `token` (answers `sleep`).
    fn awake(&mut self, token: ResponseToken) -> Result<()>;

    /// Answer a `create_*_decoder` command with the kind that was created.
    fn notify_decoder_kind(&mut self, token: ResponseToken, kind: DecoderKind) -> Result<()>;
}

/// Imports of the scheduling core, implemented by the host.
///
/// Every method is called by the core. Implementations must not call back
/// into the core synchronously; asynchronous work is started and answered
/// later through the response token.
pub trait CommandHandler {
    type Error;

    /// Milliseconds from an arbitrary, monotonic origin.
    fn now(&self) -> f64;

    /// Log an encoded message from the core. The host frees `message`.
    fn console_log(&self, message: Handle) -> std::result::Result<(), Self::Error>;

    /// Answer `token` through `awake` after `millis` milliseconds.
    fn sleep(&self, token: ResponseToken, millis: u32) -> std::result::Result<(), Self::Error>;

    fn create_audio_decoder(
        &self,
        token: ResponseToken,
        session: SessionId,
        config: Handle,
    ) -> std::result::Result<(), Self::Error>;

    fn create_video_decoder(
        &self,
        token: ResponseToken,
        session: SessionId,
        config: Handle,
    ) -> std::result::Result<(), Self::Error>;

    fn close_decoder(
        &self,
        session: SessionId,
        kind: DecoderKind,
    ) -> std::result::Result<(), Self::Error>;

    /// Submit the bytes at `offset..offset + length` to the session's
    /// decoder of `kind`. The range stays owned by the core and is only
    /// valid for the duration of the call.
    fn decode(
        &self,
        session: SessionId,
        kind: DecoderKind,
        metadata: Handle,
        offset: usize,
        length: usize,
    ) -> std::result::Result<(), Self::Error>;

    fn notify_end_of_stream(&self, session: SessionId) -> std::result::Result<(), Self::Error>;
}

/// Forward-declared reference from the core to its host.
///
/// The core has to exist before the host that wraps it, yet needs to call
/// the host. A `HostRef` is handed to the core unbound and bound once the
/// host is constructed. The reference is weak, so the core never keeps its
/// host alive.
pub struct HostRef<E> {
    cell: Rc<OnceCell<Weak<dyn CommandHandler<Error = E>>>>,
}

impl<E> Clone for HostRef<E> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<E> Default for HostRef<E> {
    fn default() -> Self {
        Self {
            cell: Rc::new(OnceCell::new()),
        }
    }
}

impl<E> fmt::Debug for HostRef<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRef")
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl<E> HostRef<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the host. Can only happen once.
    pub fn bind(&self, host: Weak<dyn CommandHandler<Error = E>>) -> Result<()> {
        self.cell.set(host).map_err(|_| FfiError::AlreadyBound)
    }

    /// The host, if bound and still alive.
    pub fn get(&self) -> Option<Rc<dyn CommandHandler<Error = E>>> {
        self.cell.get().and_then(Weak::upgrade)
    }

    pub fn is_bound(&self) -> bool {
        self.cell.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullHost;

    impl CommandHandler for NullHost {
        type Error = FfiError;

        fn now(&self) -> f64 {
            12.5
        }
        fn console_log(&self, _message: Handle) -> Result<()> {
            Ok(())
        }
        fn sleep(&self, _token: ResponseToken, _millis: u32) -> Result<()> {
            Ok(())
        }
        fn create_audio_decoder(&self, _: ResponseToken, _: SessionId, _: Handle) -> Result<()> {
            Ok(())
        }
        fn create_video_decoder(&self, _: ResponseToken, _: SessionId, _: Handle) -> Result<()> {
            Ok(())
        }
        fn close_decoder(&self, _: SessionId, _: DecoderKind) -> Result<()> {
            Ok(())
        }
        fn decode(&self, _: SessionId, _: DecoderKind, _: Handle, _: usize, _: usize) -> Result<()> {
            Ok(())
        }
        fn notify_end_of_stream(&self, _: SessionId) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn decoder_kind_tags() {
        assert_eq!(DecoderKind::Audio.tag(), 0);
        assert_eq!(DecoderKind::Video.tag(), 1);
        assert_eq!(DecoderKind::from_tag(1).unwrap(), DecoderKind::Video);
        assert!(matches!(
            DecoderKind::try_from(7),
            Err(FfiError::UnknownDecoderKind(7))
        ));
    }

    #[test]
    fn play_options_default_to_no_repeat() {
        let options: PlayOptions = serde_json::from_str("{}").unwrap();
        assert!(!options.repeat);
        let options: PlayOptions = serde_json::from_str(r#"{"repeat":true}"#).unwrap();
        assert!(options.repeat);
    }

    #[test]
    fn host_ref_binds_once_and_does_not_own_the_host() {
        let host_ref: HostRef<FfiError> = HostRef::new();
        assert!(!host_ref.is_bound());
        assert!(host_ref.get().is_none());

        let host: Rc<dyn CommandHandler<Error = FfiError>> = Rc::new(NullHost);
        host_ref.bind(Rc::downgrade(&host)).unwrap();
        assert!(host_ref.is_bound());
        assert_eq!(host_ref.clone().get().map(|h| h.now()), Some(12.5));

        assert!(matches!(
            host_ref.bind(Rc::downgrade(&host)),
            Err(FfiError::AlreadyBound)
        ));

        drop(host);
        assert!(host_ref.is_bound());
        assert!(host_ref.get().is_none());
    }
}
