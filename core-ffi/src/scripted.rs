//! A scheduling core double driven by a script.
//!
//! `ScriptedCore` satisfies [`CoreScheduler`] without any demuxing logic: it
//! records what the host asks of it and lets a test play the core's part by
//! issuing commands to the host in whatever order the scenario needs.

use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::command::{
    CommandHandler, CoreScheduler, DecoderKind, HostRef, PlayOptions, ResponseToken, SessionId,
};
use crate::error::{FfiError, Result};
use crate::marshal::CoreFailure;
use crate::memory::{Handle, SharedMemory};

/// A host-to-core call observed by the double.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreCall {
    Load { length: usize },
    Play { session: SessionId, options: PlayOptions },
    Stop { session: SessionId },
    Awake { token: ResponseToken },
    DecoderKind { token: ResponseToken, kind: DecoderKind },
}

struct ScriptedState<E> {
    host: HostRef<E>,
    memory: SharedMemory,
    load_result: std::result::Result<serde_json::Value, CoreFailure>,
    calls: RefCell<Vec<CoreCall>>,
    next_token: Cell<u32>,
}

/// Test double for the scheduling core. Clones share state, so a test keeps
/// one clone as the driver and hands another to the host.
pub struct ScriptedCore<E> {
    state: Rc<ScriptedState<E>>,
}

impl<E> Clone for ScriptedCore<E> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<E: From<FfiError>> ScriptedCore<E> {
    /// `load_result` is what `load` reports for any container: the container
    /// info JSON, or a failure.
    pub fn new(
        host: HostRef<E>,
        load_result: std::result::Result<serde_json::Value, CoreFailure>,
    ) -> Self {
        Self {
            state: Rc::new(ScriptedState {
                host,
                memory: SharedMemory::new(),
                load_result,
                calls: RefCell::new(Vec::new()),
                next_token: Cell::new(1),
            }),
        }
    }

    pub fn shared_memory(&self) -> &SharedMemory {
        &self.state.memory
    }

    fn host(&self) -> std::result::Result<Rc<dyn CommandHandler<Error = E>>, E> {
        self.state
            .host
            .get()
            .ok_or_else(|| E::from(FfiError::HostUnavailable))
    }

    pub fn next_token(&self) -> ResponseToken {
        let raw = self.state.next_token.get();
        self.state.next_token.set(raw + 1);
        ResponseToken::new(raw)
    }

    pub fn now(&self) -> std::result::Result<f64, E> {
        Ok(self.host()?.now())
    }

    pub fn log<T: Serialize + ?Sized>(&self, message: &T) -> std::result::Result<(), E> {
        let handle = self.state.memory.encode(message)?;
        self.host()?.console_log(handle)
    }

    pub fn sleep(&self, millis: u32) -> std::result::Result<ResponseToken, E> {
        let token = self.next_token();
        self.host()?.sleep(token, millis)?;
        Ok(token)
    }

    /// Issue `create_audio_decoder` with a fresh token.
    pub fn create_audio_decoder<C: Serialize>(
        &self,
        session: SessionId,
        config: &C,
    ) -> std::result::Result<ResponseToken, E> {
        let token = self.next_token();
        self.create_decoder(DecoderKind::Audio, token, session, config)?;
        Ok(token)
    }

    /// Issue `create_video_decoder` with a fresh token.
    pub fn create_video_decoder<C: Serialize>(
        &self,
        session: SessionId,
        config: &C,
    ) -> std::result::Result<ResponseToken, E> {
        let token = self.next_token();
        self.create_decoder(DecoderKind::Video, token, session, config)?;
        Ok(token)
    }

    /// Issue a create command with an explicit token.
    pub fn create_decoder<C: Serialize>(
        &self,
        kind: DecoderKind,
        token: ResponseToken,
        session: SessionId,
        config: &C,
    ) -> std::result::Result<(), E> {
        let handle = self.state.memory.encode(config)?;
        let host = self.host()?;
        match kind {
            DecoderKind::Audio => host.create_audio_decoder(token, session, handle),
            DecoderKind::Video => host.create_video_decoder(token, session, handle),
        }
    }

    pub fn close_decoder(
        &self,
        session: SessionId,
        kind: DecoderKind,
    ) -> std::result::Result<(), E> {
        self.host()?.close_decoder(session, kind)
    }

    /// Place `data` in shared memory, issue `decode`, and release the region
    /// as soon as the command returns, the way the core recycles its buffers.
    pub fn decode<M: Serialize>(
        &self,
        session: SessionId,
        kind: DecoderKind,
        metadata: &M,
        data: &[u8],
    ) -> std::result::Result<(), E> {
        let memory = &self.state.memory;
        let region = memory.allocate_bytes(data);
        let offset = memory.offset(region)?;
        let metadata = memory.encode(metadata)?;

        let result = self
            .host()
            .and_then(|host| host.decode(session, kind, metadata, offset, data.len()));

        // Scribble over the range so a host that kept a reference sees garbage.
        memory.write(offset, &vec![0xAA; data.len()])?;
        memory.free(region)?;
        result
    }

    pub fn end_of_stream(&self, session: SessionId) -> std::result::Result<(), E> {
        self.host()?.notify_end_of_stream(session)
    }

    /// Every host-to-core call so far, in order.
    pub fn calls(&self) -> Vec<CoreCall> {
        self.state.calls.borrow().clone()
    }

    pub fn played_sessions(&self) -> Vec<SessionId> {
        self.filter_calls(|call| match call {
            CoreCall::Play { session, .. } => Some(*session),
            _ => None,
        })
    }

    pub fn stopped_sessions(&self) -> Vec<SessionId> {
        self.filter_calls(|call| match call {
            CoreCall::Stop { session } => Some(*session),
            _ => None,
        })
    }

    pub fn awakened(&self) -> Vec<ResponseToken> {
        self.filter_calls(|call| match call {
            CoreCall::Awake { token } => Some(*token),
            _ => None,
        })
    }

    pub fn decoder_kinds(&self) -> Vec<(ResponseToken, DecoderKind)> {
        self.filter_calls(|call| match call {
            CoreCall::DecoderKind { token, kind } => Some((*token, *kind)),
            _ => None,
        })
    }

    fn filter_calls<T>(&self, f: impl Fn(&CoreCall) -> Option<T>) -> Vec<T> {
        self.state.calls.borrow().iter().filter_map(f).collect()
    }

    fn record(&self, call: CoreCall) {
        tracing::trace!(?call, "scripted core call");
        self.state.calls.borrow_mut().push(call);
    }
}

impl<E: From<FfiError>> CoreScheduler for ScriptedCore<E> {
    fn memory(&self) -> SharedMemory {
        self.state.memory.clone()
    }

    fn load(&mut self, container: Handle) -> Result<Handle> {
        let bytes = self.state.memory.take(container)?;
        self.record(CoreCall::Load {
            length: bytes.len(),
        });
        let result = self.state.load_result.as_ref();
        self.state.memory.encode_result(result)
    }

    fn play(&mut self, session: SessionId, options: Handle) -> Result<()> {
        let options: PlayOptions = self.state.memory.decode(options)?;
        self.record(CoreCall::Play { session, options });
        Ok(())
    }

    fn stop(&mut self, session: SessionId) -> Result<()> {
        self.record(CoreCall::Stop { session });
        Ok(())
    }

    fn awake(&mut self, token: ResponseToken) -> Result<()> {
        self.record(CoreCall::Awake { token });
        Ok(())
    }

    fn notify_decoder_kind(&mut self, token: ResponseToken, kind: DecoderKind) -> Result<()> {
        self.record(CoreCall::DecoderKind { token, kind });
        Ok(())
    }
}
