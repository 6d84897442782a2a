//! # Playback Session
//!
//! One playback instance: the decoders the core asked for and the sinks
//! their output goes to.
//!
//! ## Teardown
//!
//! Closing a decoder suspends on `flush`, and a second close of the same
//! decoder (from `stop`, from a replacement decoder being created, or from
//! an explicit `close_decoder` command) may run while the first one is
//! suspended. The close routine therefore treats an abort from `flush` as
//! expected, and after resuming only closes the decoder if it is still the
//! one installed in the slot and still open. Whichever routine gets there
//! first closes it; the others do nothing.

use bridge_traits::{AudioData, BridgeError, CodecState, MediaDecoder, MediaSink, VideoFrame};
use core_ffi::{DecoderKind, SessionId};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace, warn};

use crate::output::{AudioFormat, AudioRenderSink, AudioTrack, OutputStream, VideoFrameSink};
use crate::ring_buffer::RenderRingBuffer;

type DecoderSlot = RefCell<Option<Rc<dyn MediaDecoder>>>;

/// A live playback session.
///
/// Owned by the engine's registry. Decoder and sink handles are only ever
/// held here; other code clones them out for the duration of one call.
pub struct Session {
    id: SessionId,
    wants_audio: bool,
    wants_video: bool,
    audio_decoder: DecoderSlot,
    video_decoder: DecoderSlot,
    audio_sink: RefCell<Option<Rc<dyn MediaSink<AudioData>>>>,
    video_sink: RefCell<Option<Rc<dyn MediaSink<VideoFrame>>>>,
}

impl Session {
    pub fn new(id: SessionId, wants_audio: bool, wants_video: bool) -> Self {
        Self {
            id,
            wants_audio,
            wants_video,
            audio_decoder: RefCell::new(None),
            video_decoder: RefCell::new(None),
            audio_sink: RefCell::new(None),
            video_sink: RefCell::new(None),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn wants(&self, kind: DecoderKind) -> bool {
        match kind {
            DecoderKind::Audio => self.wants_audio,
            DecoderKind::Video => self.wants_video,
        }
    }

    /// Create a sink for every wanted media kind and return the consumer
    /// halves. The tracks are empty until decoders start producing output.
    pub fn create_outputs(
        &self,
        format: AudioFormat,
        max_queued_audio_chunks: Option<usize>,
    ) -> OutputStream {
        let audio = self.wants_audio.then(|| {
            let buffer = RenderRingBuffer::with_max_chunks(max_queued_audio_chunks);
            self.attach_audio_sink(Rc::new(AudioRenderSink::new(buffer.clone())));
            AudioTrack::new(format, buffer)
        });

        let video = self.wants_video.then(|| {
            let (sink, track) = VideoFrameSink::channel();
            self.attach_video_sink(Rc::new(sink));
            track
        });

        OutputStream {
            session: self.id,
            audio,
            video,
        }
    }

    pub fn attach_audio_sink(&self, sink: Rc<dyn MediaSink<AudioData>>) {
        *self.audio_sink.borrow_mut() = Some(sink);
    }

    pub fn attach_video_sink(&self, sink: Rc<dyn MediaSink<VideoFrame>>) {
        *self.video_sink.borrow_mut() = Some(sink);
    }

    fn slot(&self, kind: DecoderKind) -> &DecoderSlot {
        match kind {
            DecoderKind::Audio => &self.audio_decoder,
            DecoderKind::Video => &self.video_decoder,
        }
    }

    /// The installed decoder of `kind`, if any.
    pub fn decoder(&self, kind: DecoderKind) -> Option<Rc<dyn MediaDecoder>> {
        self.slot(kind).borrow().clone()
    }

    /// Install a freshly configured decoder, returning whatever it displaced.
    pub fn install_decoder(
        &self,
        kind: DecoderKind,
        decoder: Rc<dyn MediaDecoder>,
    ) -> Option<Rc<dyn MediaDecoder>> {
        self.slot(kind).borrow_mut().replace(decoder)
    }

    /// Returns `true` while any decoder or sink handle is held.
    pub fn holds_resources(&self) -> bool {
        self.audio_decoder.borrow().is_some()
            || self.video_decoder.borrow().is_some()
            || self.audio_sink.borrow().is_some()
            || self.video_sink.borrow().is_some()
    }

    /// Flush and close the decoder of `kind`.
    ///
    /// Returns `Ok(true)` if this call closed the decoder, `Ok(false)` if
    /// there was nothing to close or a concurrent close got there first.
    ///
    /// # Errors
    ///
    /// Flush and close failures other than aborts are returned. The slot is
    /// cleared anyway when the close itself fails.
    pub async fn close_decoder(&self, kind: DecoderKind) -> Result<bool, BridgeError> {
        let Some(decoder) = self.decoder(kind) else {
            return Ok(false);
        };

        if decoder.state() != CodecState::Closed {
            match decoder.flush().await {
                Ok(()) => {}
                Err(e) if e.is_abort() => {
                    trace!(session = self.id, %kind, "Flush aborted by concurrent close");
                }
                Err(e) => return Err(e),
            }
        }

        // The slot may have been cleared or refilled while flushing.
        let slot = self.slot(kind);
        let still_installed = slot
            .borrow()
            .as_ref()
            .is_some_and(|current| same_decoder(current, &decoder));
        if !still_installed {
            return Ok(false);
        }

        slot.borrow_mut().take();
        if decoder.state() == CodecState::Closed {
            return Ok(false);
        }
        decoder.close()?;
        debug!(session = self.id, %kind, "Decoder closed");
        Ok(true)
    }

    /// Write decoded audio to the session's audio sink.
    ///
    /// A session without an audio sink reports `SinkClosed`.
    pub async fn write_audio(&self, data: AudioData) -> Result<(), BridgeError> {
        let sink = self.audio_sink.borrow().clone();
        match sink {
            Some(sink) => sink.write(data).await,
            None => Err(BridgeError::SinkClosed),
        }
    }

    /// Write a decoded frame to the session's video sink.
    pub async fn write_video(&self, frame: VideoFrame) -> Result<(), BridgeError> {
        let sink = self.video_sink.borrow().clone();
        match sink {
            Some(sink) => sink.write(frame).await,
            None => Err(BridgeError::SinkClosed),
        }
    }

    /// Release every resource the session holds.
    ///
    /// Both decoders are closed, then both sinks. Sink close failures are
    /// logged and swallowed. After this returns the session holds no decoder
    /// or sink handles, whether or not an error is returned, and calling it
    /// again is a no-op.
    ///
    /// Returns the decoder kinds this call closed.
    pub async fn stop(&self) -> Result<Vec<DecoderKind>, BridgeError> {
        let mut closed = Vec::new();
        let mut first_error = None;

        for kind in DecoderKind::ALL {
            match self.close_decoder(kind).await {
                Ok(true) => closed.push(kind),
                Ok(false) => {}
                Err(e) => {
                    warn!(session = self.id, %kind, error = %e, "Decoder close failed during stop");
                    let leftover = self.slot(kind).borrow_mut().take();
                    if let Some(decoder) = leftover {
                        if decoder.state() != CodecState::Closed {
                            if let Err(close_error) = decoder.close() {
                                warn!(
                                    session = self.id,
                                    %kind,
                                    error = %close_error,
                                    "Decoder left open after failed close"
                                );
                            }
                        }
                    }
                    first_error.get_or_insert(e);
                }
            }
        }

        let audio_sink = self.audio_sink.borrow_mut().take();
        if let Some(sink) = audio_sink {
            log_sink_close(self.id, DecoderKind::Audio, sink.close().await);
        }
        let video_sink = self.video_sink.borrow_mut().take();
        if let Some(sink) = video_sink {
            log_sink_close(self.id, DecoderKind::Video, sink.close().await);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(closed),
        }
    }
}

fn same_decoder(a: &Rc<dyn MediaDecoder>, b: &Rc<dyn MediaDecoder>) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

fn log_sink_close(session: SessionId, kind: DecoderKind, result: Result<(), BridgeError>) {
    match result {
        Ok(()) => {}
        Err(e) if e.is_sink_closed() => {
            debug!(session, %kind, "Sink was already closed by its consumer");
        }
        Err(e) => {
            warn!(session, %kind, error = %e, "Failed to close output sink");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("wants_audio", &self.wants_audio)
            .field("wants_video", &self.wants_video)
            .field("audio_decoder", &self.audio_decoder.borrow().is_some())
            .field("video_decoder", &self.video_decoder.borrow().is_some())
            .field("audio_sink", &self.audio_sink.borrow().is_some())
            .field("video_sink", &self.video_sink.borrow().is_some())
            .finish()
    }
}
