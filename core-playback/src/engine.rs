//! # Playback Engine
//!
//! Owns the scheduling core and the registry of live sessions, and answers
//! the commands the core issues while it plays them.
//!
//! ## Overview
//!
//! The host drives the engine through [`Engine::load`], [`Engine::play`] and
//! [`Engine::stop`]. Everything else happens because the core asks for it:
//! the engine implements [`CommandHandler`] and turns each command into
//! decoder and sink operations on the addressed session.
//!
//! ```text
//!  host ──load/play/stop──> Engine ──load/play/stop/awake──> core
//!                             ^                                │
//!                             └──── sleep/create/decode/... ───┘
//! ```
//!
//! ## Concurrency
//!
//! Everything runs on one thread. Command handlers return immediately and
//! do their asynchronous part in local tasks, so several handlers can be
//! suspended at once. The registry is mutated only here, one insert or
//! remove at a time, and `stop` removes a session before its teardown
//! starts. Any task that resumes after an await checks again that its
//! session is still registered before touching it.
//!
//! Commands for a session that is no longer registered are dropped without
//! an error: they are the expected result of racing `stop`.
//!
//! ## Failures
//!
//! Decoder and sink failures stop their session and are then recorded. The
//! host observes recorded failures through [`Engine::settle`] and
//! [`Engine::take_failures`], and as [`PlaybackEvent::SessionFailed`].
//!
//! ## Usage
//!
//! ```ignore
//! use core_playback::Engine;
//! use core_ffi::PlayOptions;
//!
//! let engine = Engine::new(config, |host| Box::new(MyCore::new(host)))?;
//! let info = engine.load(&mp4_bytes).await?;
//! let mut stream = engine.play(PlayOptions::default())?;
//! // ... render stream.audio / stream.video ...
//! engine.stop(stream.session).await?;
//! ```

use bridge_traits::{
    AudioData, AudioDecoderConfig, BridgeError, ChunkMetadata, CodecState, DecoderCallbacks,
    DecoderConfig, EncodedChunk, MediaDecoder, VideoDecoderConfig, VideoFrame,
};
use core_async::task::JoinHandle;
use core_ffi::{
    CommandHandler, CoreScheduler, DecoderKind, Handle, HostRef, PlayOptions, ResponseToken,
    SessionId, SharedMemory,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::{EventBus, PlaybackEvent, Receiver};
use core_runtime::logging::CORE_TARGET;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::container::ContainerInfo;
use crate::error::{PlaybackError, Result};
use crate::output::OutputStream;
use crate::session::Session;

/// Host side of the scheduling core.
pub struct Engine {
    state: Rc<EngineState>,
}

struct EngineState {
    this: Weak<EngineState>,
    core: RefCell<Box<dyn CoreScheduler>>,
    memory: SharedMemory,
    config: CoreConfig,
    events: EventBus,
    info: RefCell<Option<ContainerInfo>>,
    loading: Cell<bool>,
    sessions: RefCell<BTreeMap<SessionId, Rc<Session>>>,
    next_session: Cell<SessionId>,
    /// Tokens of commands the engine has not answered yet.
    outstanding: RefCell<HashSet<ResponseToken>>,
    tasks: RefCell<Vec<JoinHandle<()>>>,
    failures: RefCell<Vec<PlaybackError>>,
}

/// A session already removed from the registry, waiting for teardown.
struct Detached {
    session: Rc<Session>,
    /// Outcome of the core's `stop`, or `None` if it still has to be sent.
    released: Option<Result<()>>,
}

impl Engine {
    /// Construct the core and the engine around it.
    ///
    /// `make_core` receives the engine's [`HostRef`] while the engine does
    /// not exist yet; the reference is bound as soon as construction
    /// finishes and before this function returns.
    ///
    /// # Errors
    ///
    /// Returns [`PlaybackError::Runtime`] if `config` does not validate.
    pub fn new<F>(config: CoreConfig, make_core: F) -> Result<Self>
    where
        F: FnOnce(HostRef<PlaybackError>) -> Box<dyn CoreScheduler>,
    {
        config.validate()?;

        let host = HostRef::new();
        let core = make_core(host.clone());
        let memory = core.memory();
        let events = EventBus::new(config.event_capacity);

        let state = Rc::new_cyclic(|this| EngineState {
            this: this.clone(),
            core: RefCell::new(core),
            memory,
            config,
            events,
            info: RefCell::new(None),
            loading: Cell::new(false),
            sessions: RefCell::new(BTreeMap::new()),
            next_session: Cell::new(0),
            outstanding: RefCell::new(HashSet::new()),
            tasks: RefCell::new(Vec::new()),
            failures: RefCell::new(Vec::new()),
        });

        let weak: Weak<EngineState> = Rc::downgrade(&state);
        let handler: Weak<dyn CommandHandler<Error = PlaybackError>> = weak;
        host.bind(handler)?;

        debug!("Playback engine created");
        Ok(Self { state })
    }

    /// Hand the container to the core and check that every track it
    /// reports can be decoded here.
    ///
    /// # Errors
    ///
    /// - [`PlaybackError::AlreadyLoaded`] if a container was loaded before
    /// - [`PlaybackError::Boundary`] if the core rejects the container
    /// - [`PlaybackError::UnsupportedConfiguration`] for the first track the
    ///   platform cannot decode; nothing can be played afterwards
    #[instrument(skip(self, container), fields(bytes = container.len()))]
    pub async fn load(&self, container: &[u8]) -> Result<ContainerInfo> {
        let state = &self.state;
        if state.loading.get() || state.info.borrow().is_some() {
            return Err(PlaybackError::AlreadyLoaded);
        }

        state.loading.set(true);
        let loaded = state.load_container(container).await;
        state.loading.set(false);

        let info = match loaded {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "Container rejected");
                return Err(e);
            }
        };

        info!(
            has_audio = info.has_audio(),
            has_video = info.has_video(),
            "Container loaded"
        );
        *state.info.borrow_mut() = Some(info.clone());
        state.emit(PlaybackEvent::Loaded {
            has_audio: info.has_audio(),
            has_video: info.has_video(),
        });
        Ok(info)
    }

    /// Start a new session and return its output tracks.
    ///
    /// The session is registered before the core hears about it, so
    /// commands the core issues right away find it. The tracks stay empty
    /// until the core creates decoders.
    #[instrument(skip(self))]
    pub fn play(&self, options: PlayOptions) -> Result<OutputStream> {
        let state = &self.state;
        let info = state
            .info
            .borrow()
            .clone()
            .ok_or(PlaybackError::NotLoaded)?;

        let id = state.next_session.get();
        state.next_session.set(id.wrapping_add(1));

        let session = Rc::new(Session::new(id, info.has_audio(), info.has_video()));
        let playback = &state.config.playback;
        let outputs =
            session.create_outputs(info.audio_format(playback), playback.max_queued_audio_chunks);
        state.sessions.borrow_mut().insert(id, session);

        let started = state
            .memory
            .encode(&options)
            .map_err(PlaybackError::from)
            .and_then(|handle| state.with_core(|core| core.play(id, handle)));
        if let Err(e) = started {
            state.sessions.borrow_mut().remove(&id);
            error!(session = id, error = %e, "Core refused to start session");
            return Err(e);
        }

        info!(session = id, repeat = options.repeat, "Session started");
        state.emit(PlaybackEvent::SessionStarted { session: id });
        Ok(outputs)
    }

    /// Stop a session and wait for its resources to be released.
    ///
    /// The session leaves the registry before anything is awaited, so
    /// commands arriving during teardown are already ignored. Stopping a
    /// session that is not live is a no-op.
    #[instrument(skip(self))]
    pub async fn stop(&self, session: SessionId) -> Result<()> {
        self.state.stop_session(session).await
    }

    /// Stop every live session, one after the other.
    ///
    /// Every session is stopped even if some teardown fails; the first
    /// failure is returned.
    pub async fn stop_all(&self) -> Result<()> {
        let mut first_error = None;
        for id in self.session_ids() {
            if let Err(e) = self.stop(id).await {
                warn!(session = id, error = %e, "Session teardown failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Wait until every command task has finished, including tasks those
    /// tasks spawned, then report the oldest recorded failure.
    ///
    /// Each failure is reported once: the returned error is removed from the
    /// record, the rest stay for [`take_failures`](Self::take_failures).
    pub async fn settle(&self) -> Result<()> {
        loop {
            let pending = std::mem::take(&mut *self.state.tasks.borrow_mut());
            if pending.is_empty() {
                break;
            }
            for joined in core_async::future::join_all(pending).await {
                if let Err(e) = joined {
                    self.state
                        .record_failure(None, PlaybackError::Task(e.to_string()));
                }
            }
        }

        let mut failures = self.state.failures.borrow_mut();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.remove(0))
        }
    }

    /// Drain every recorded failure, oldest first.
    pub fn take_failures(&self) -> Vec<PlaybackError> {
        std::mem::take(&mut *self.state.failures.borrow_mut())
    }

    pub fn subscribe(&self) -> Receiver<PlaybackEvent> {
        self.state.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.state.events
    }

    pub fn memory(&self) -> SharedMemory {
        self.state.memory.clone()
    }

    pub fn container_info(&self) -> Option<ContainerInfo> {
        self.state.info.borrow().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.state.info.borrow().is_some()
    }

    pub fn is_live(&self, session: SessionId) -> bool {
        self.state.is_live(session)
    }

    /// Live session ids in ascending order.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.state.sessions.borrow().keys().copied().collect()
    }

    /// The live session registered under `id`.
    pub fn session(&self, id: SessionId) -> Option<Rc<Session>> {
        self.state.session(id)
    }

    /// Number of command tokens the engine still has to answer.
    pub fn outstanding_tokens(&self) -> usize {
        self.state.outstanding.borrow().len()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("loaded", &self.is_loaded())
            .field("sessions", &self.session_ids())
            .field("outstanding_tokens", &self.outstanding_tokens())
            .finish()
    }
}

impl EngineState {
    fn emit(&self, event: PlaybackEvent) {
        // No subscribers is fine.
        self.events.emit(event).ok();
    }

    fn session(&self, id: SessionId) -> Option<Rc<Session>> {
        self.sessions.borrow().get(&id).cloned()
    }

    fn is_live(&self, id: SessionId) -> bool {
        self.sessions.borrow().contains_key(&id)
    }

    /// Whether `session` is still the one registered under its id.
    fn is_current(&self, session: &Rc<Session>) -> bool {
        self.sessions
            .borrow()
            .get(&session.id())
            .is_some_and(|current| Rc::ptr_eq(current, session))
    }

    fn with_core<T>(
        &self,
        call: impl FnOnce(&mut dyn CoreScheduler) -> core_ffi::Result<T>,
    ) -> Result<T> {
        let mut core = self
            .core
            .try_borrow_mut()
            .map_err(|_| PlaybackError::ReentrantCore)?;
        call(&mut **core).map_err(PlaybackError::from)
    }

    fn claim_token(&self, token: ResponseToken) -> Result<()> {
        if !self.outstanding.borrow_mut().insert(token) {
            error!(%token, "Core reused an outstanding response token");
            return Err(PlaybackError::TokenReused(token));
        }
        Ok(())
    }

    fn release_token(&self, token: ResponseToken) {
        self.outstanding.borrow_mut().remove(&token);
    }

    /// Run the asynchronous part of a command in a tracked local task.
    ///
    /// A failure of a session-scoped command stops that session before it
    /// is recorded.
    fn spawn_command<C, F>(&self, session: Option<SessionId>, command: C)
    where
        C: FnOnce(Rc<EngineState>) -> F,
        F: Future<Output = Result<()>> + 'static,
    {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let command = command(Rc::clone(&this));
        let task = core_async::spawn_local(async move {
            if let Err(error) = command.await {
                this.fail(session, error).await;
            }
        });

        let mut tasks = self.tasks.borrow_mut();
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    async fn fail(&self, session: Option<SessionId>, error: PlaybackError) {
        if let Some(id) = session {
            if let Err(stop_error) = self.stop_session(id).await {
                warn!(session = id, error = %stop_error, "Teardown after failure also failed");
            }
        }
        self.record_failure(session, error);
    }

    fn record_failure(&self, session: Option<SessionId>, error: PlaybackError) {
        error!(session = ?session, error = %error, "Playback command failed");
        self.emit(PlaybackEvent::SessionFailed {
            session,
            message: error.to_string(),
        });
        self.failures.borrow_mut().push(error);
    }

    async fn load_container(&self, container: &[u8]) -> Result<ContainerInfo> {
        // The core frees the container region once it has parsed it.
        let region = self.memory.allocate_bytes(container);
        let envelope = self.with_core(|core| core.load(region))?;
        let info: ContainerInfo = self.memory.decode_result(envelope)?;
        info.validate(self.config.platform.as_ref()).await?;
        Ok(info)
    }

    async fn stop_session(&self, id: SessionId) -> Result<()> {
        let Some(detached) = self.detach(id) else {
            trace!(session = id, "Stop for a session that is not live");
            return Ok(());
        };
        self.teardown(detached).await
    }

    /// Remove `id` from the registry and tell the core to forget it.
    ///
    /// Nothing is awaited, so a command handler can stop a session and have
    /// every later command of the same batch miss it. When the core is busy
    /// calling into us, its `stop` is deferred to the teardown.
    fn detach(&self, id: SessionId) -> Option<Detached> {
        let session = self.sessions.borrow_mut().remove(&id)?;
        info!(session = id, "Stopping session");
        let released = match self.with_core(|core| core.stop(id)) {
            Err(PlaybackError::ReentrantCore) => None,
            released => Some(released),
        };
        Some(Detached { session, released })
    }

    /// Release what a detached session holds and publish `SessionStopped`.
    async fn teardown(&self, detached: Detached) -> Result<()> {
        let Detached { session, released } = detached;
        let id = session.id();
        let released = match released {
            Some(released) => released,
            None => self.with_core(|core| core.stop(id)),
        };
        let teardown = session.stop().await;

        if let Ok(closed) = &teardown {
            for &kind in closed {
                self.emit(PlaybackEvent::DecoderClosed { session: id, kind });
            }
        }
        self.emit(PlaybackEvent::SessionStopped { session: id });
        debug!(session = id, "Session teardown finished");

        released?;
        teardown.map(|_| ()).map_err(PlaybackError::Decoder)
    }

    fn start_decoder(
        &self,
        token: ResponseToken,
        id: SessionId,
        config: DecoderConfig,
    ) -> Result<()> {
        let kind = if config.is_audio() {
            DecoderKind::Audio
        } else {
            DecoderKind::Video
        };
        if !self.is_live(id) {
            debug!(session = id, %kind, "Decoder requested for a stopped session");
            return Ok(());
        }
        self.claim_token(token)?;

        self.spawn_command(Some(id), move |this| async move {
            this.answer_create(token, id, kind, config).await
        });
        Ok(())
    }

    async fn answer_create(
        &self,
        token: ResponseToken,
        id: SessionId,
        kind: DecoderKind,
        config: DecoderConfig,
    ) -> Result<()> {
        let created = self.create_decoder(id, kind, config).await;
        // Released before answering: the core may reuse the token from
        // inside the answer.
        self.release_token(token);
        if !created? {
            return Ok(());
        }
        self.with_core(|core| core.notify_decoder_kind(token, kind))?;
        self.emit(PlaybackEvent::DecoderCreated { session: id, kind });
        Ok(())
    }

    /// Returns `Ok(false)` if the session went away before the decoder was
    /// installed.
    async fn create_decoder(
        &self,
        id: SessionId,
        kind: DecoderKind,
        config: DecoderConfig,
    ) -> Result<bool> {
        let Some(session) = self.session(id) else {
            return Ok(false);
        };

        // A previous decoder of this kind may still be draining.
        if session
            .close_decoder(kind)
            .await
            .map_err(PlaybackError::Decoder)?
        {
            self.emit(PlaybackEvent::DecoderClosed { session: id, kind });
        }
        if !self.is_current(&session) {
            debug!(session = id, %kind, "Session stopped while the previous decoder drained");
            return Ok(false);
        }

        let decoder = self.build_decoder(id, kind)?;
        if let Err(e) = decoder.configure(&config) {
            if let Err(close_error) = decoder.close() {
                warn!(
                    session = id,
                    %kind,
                    error = %close_error,
                    "Failed to close unconfigured decoder"
                );
            }
            return Err(PlaybackError::Decoder(e));
        }

        if let Some(displaced) = session.install_decoder(kind, decoder) {
            warn!(session = id, %kind, "Replaced a decoder that was installed concurrently");
            if displaced.state() != CodecState::Closed {
                if let Err(e) = displaced.close() {
                    warn!(session = id, %kind, error = %e, "Failed to close displaced decoder");
                }
            }
        }
        info!(session = id, %kind, codec = config.codec(), "Decoder created");
        Ok(true)
    }

    fn build_decoder(&self, id: SessionId, kind: DecoderKind) -> Result<Rc<dyn MediaDecoder>> {
        let platform = &self.config.platform;
        let decoder = match kind {
            DecoderKind::Audio => {
                platform.create_audio_decoder(self.callbacks(id, kind, Self::forward_audio))
            }
            DecoderKind::Video => {
                platform.create_video_decoder(self.callbacks(id, kind, Self::forward_video))
            }
        };
        decoder.map_err(PlaybackError::Platform)
    }

    /// Decoder callbacks holding the engine weakly, so a decoder never keeps
    /// its engine alive.
    fn callbacks<T: 'static>(
        &self,
        id: SessionId,
        kind: DecoderKind,
        forward: fn(&EngineState, SessionId, T),
    ) -> DecoderCallbacks<T> {
        let on_output = self.this.clone();
        let on_error = self.this.clone();
        DecoderCallbacks::new(
            move |item| {
                if let Some(engine) = on_output.upgrade() {
                    forward(&engine, id, item);
                }
            },
            move |error| {
                if let Some(engine) = on_error.upgrade() {
                    engine.on_decoder_error(id, kind, error);
                }
            },
        )
    }

    fn forward_audio(&self, id: SessionId, data: AudioData) {
        self.spawn_command(Some(id), move |this| async move {
            let Some(session) = this.session(id) else {
                return Ok(());
            };
            let written = session.write_audio(data).await;
            this.finish_write(id, DecoderKind::Audio, written).await
        });
    }

    fn forward_video(&self, id: SessionId, frame: VideoFrame) {
        self.spawn_command(Some(id), move |this| async move {
            let Some(session) = this.session(id) else {
                return Ok(());
            };
            let written = session.write_video(frame).await;
            this.finish_write(id, DecoderKind::Video, written).await
        });
    }

    async fn finish_write(
        &self,
        id: SessionId,
        kind: DecoderKind,
        written: std::result::Result<(), BridgeError>,
    ) -> Result<()> {
        match written {
            Ok(()) => Ok(()),
            Err(e) if e.is_sink_closed() => {
                debug!(session = id, %kind, "Output consumer went away, stopping session");
                self.stop_session(id).await
            }
            Err(e) => Err(PlaybackError::Sink(e)),
        }
    }

    async fn close_session_decoder(&self, id: SessionId, kind: DecoderKind) -> Result<()> {
        let Some(session) = self.session(id) else {
            return Ok(());
        };
        let closed = session
            .close_decoder(kind)
            .await
            .map_err(PlaybackError::Decoder)?;
        if closed {
            self.emit(PlaybackEvent::DecoderClosed { session: id, kind });
        }
        Ok(())
    }

    fn on_decoder_error(&self, id: SessionId, kind: DecoderKind, error: BridgeError) {
        if error.is_abort() {
            debug!(session = id, %kind, error = %error, "Decoder abort ignored");
            return;
        }
        let Some(detached) = self.detach(id) else {
            debug!(session = id, %kind, error = %error, "Decoder error after teardown ignored");
            return;
        };
        self.spawn_command(None, move |this| async move {
            if let Err(stop_error) = this.teardown(detached).await {
                warn!(session = id, error = %stop_error, "Teardown after decoder error also failed");
            }
            this.record_failure(Some(id), PlaybackError::Decoder(error));
            Ok(())
        });
    }
}

impl CommandHandler for EngineState {
    type Error = PlaybackError;

    fn now(&self) -> f64 {
        self.config.clock.now_millis()
    }

    fn console_log(&self, message: Handle) -> Result<()> {
        let message: serde_json::Value = self.memory.decode(message)?;
        match message {
            serde_json::Value::String(text) => info!(target: CORE_TARGET, "{}", text),
            other => info!(target: CORE_TARGET, "{}", other),
        }
        Ok(())
    }

    fn sleep(&self, token: ResponseToken, millis: u32) -> Result<()> {
        self.claim_token(token)?;
        trace!(%token, millis, "Sleep requested");

        self.spawn_command(None, move |this| async move {
            core_async::time::sleep_millis(millis).await;
            this.release_token(token);
            this.with_core(|core| core.awake(token))
        });
        Ok(())
    }

    fn create_audio_decoder(
        &self,
        token: ResponseToken,
        session: SessionId,
        config: Handle,
    ) -> Result<()> {
        let config: AudioDecoderConfig = self.memory.decode(config)?;
        self.start_decoder(token, session, DecoderConfig::Audio(config))
    }

    fn create_video_decoder(
        &self,
        token: ResponseToken,
        session: SessionId,
        config: Handle,
    ) -> Result<()> {
        let config: VideoDecoderConfig = self.memory.decode(config)?;
        self.start_decoder(token, session, DecoderConfig::Video(config))
    }

    fn close_decoder(&self, id: SessionId, kind: DecoderKind) -> Result<()> {
        if !self.is_live(id) {
            trace!(session = id, %kind, "Close for a stopped session ignored");
            return Ok(());
        }

        self.spawn_command(Some(id), move |this| async move {
            this.close_session_decoder(id, kind).await
        });
        Ok(())
    }

    fn decode(
        &self,
        id: SessionId,
        kind: DecoderKind,
        metadata: Handle,
        offset: usize,
        length: usize,
    ) -> Result<()> {
        let metadata: ChunkMetadata = self.memory.decode(metadata)?;
        let Some(session) = self.session(id) else {
            trace!(session = id, %kind, "Chunk for a stopped session dropped");
            return Ok(());
        };

        // The range belongs to the core and is reused once this returns.
        let data = self.memory.read(offset, length)?;
        let decoder = session
            .decoder(kind)
            .ok_or(PlaybackError::MissingDecoder { session: id, kind })?;

        trace!(
            session = id,
            %kind,
            timestamp = metadata.timestamp,
            bytes = length,
            "Submitting chunk"
        );
        if let Err(e) = decoder.decode(EncodedChunk::new(&metadata, data)) {
            error!(session = id, %kind, error = %e, "Decoder rejected chunk");
            if let Some(detached) = self.detach(id) {
                self.spawn_command(None, move |this| async move { this.teardown(detached).await });
            }
            return Err(PlaybackError::Decoder(e));
        }
        Ok(())
    }

    fn notify_end_of_stream(&self, id: SessionId) -> Result<()> {
        if !self.is_live(id) {
            return Ok(());
        }

        info!(session = id, "End of stream");
        self.emit(PlaybackEvent::EndOfStream { session: id });
        if let Some(detached) = self.detach(id) {
            self.spawn_command(Some(id), move |this| async move { this.teardown(detached).await });
        }
        Ok(())
    }
}
