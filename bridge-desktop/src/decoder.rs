//! In-process software decoders.
//!
//! These decoders do not decompress anything. Audio chunks are read as
//! little-endian `f32` PCM and video chunks are passed through as raw
//! frames. What they do reproduce faithfully is the lifecycle of a platform
//! codec: configure before decode, output through callbacks, a `flush` that
//! suspends and is aborted by a concurrent `close`, and `close` failing on an
//! already-closed decoder.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    AudioData, CodecState, DecoderCallbacks, DecoderConfig, EncodedChunk, MediaDecoder,
    VideoFrame,
};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace};

enum Output {
    Audio(DecoderCallbacks<AudioData>),
    Video(DecoderCallbacks<VideoFrame>),
}

/// Software decoder handed out by [`SoftwarePlatform`](crate::SoftwarePlatform).
pub struct SoftwareDecoder {
    output: Output,
    state: Cell<CodecState>,
    config: RefCell<Option<DecoderConfig>>,
    injected_error: RefCell<Option<BridgeError>>,
    decoded: Cell<usize>,
    flushes: Cell<usize>,
    closes: Cell<usize>,
}

impl SoftwareDecoder {
    pub(crate) fn audio(callbacks: DecoderCallbacks<AudioData>) -> Rc<Self> {
        Rc::new(Self::with_output(Output::Audio(callbacks)))
    }

    pub(crate) fn video(callbacks: DecoderCallbacks<VideoFrame>) -> Rc<Self> {
        Rc::new(Self::with_output(Output::Video(callbacks)))
    }

    fn with_output(output: Output) -> Self {
        Self {
            output,
            state: Cell::new(CodecState::Unconfigured),
            config: RefCell::new(None),
            injected_error: RefCell::new(None),
            decoded: Cell::new(0),
            flushes: Cell::new(0),
            closes: Cell::new(0),
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.output, Output::Audio(_))
    }

    pub fn config(&self) -> Option<DecoderConfig> {
        self.config.borrow().clone()
    }

    /// Report `error` through the error callback on the next `decode`.
    pub fn inject_error(&self, error: BridgeError) {
        *self.injected_error.borrow_mut() = Some(error);
    }

    /// Chunks that produced output.
    pub fn decoded_chunks(&self) -> usize {
        self.decoded.get()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.get()
    }

    /// Successful `close` calls. Anything above one indicates a double close.
    pub fn close_count(&self) -> usize {
        self.closes.get()
    }

    fn emit(&self, chunk: EncodedChunk) {
        // Callbacks may re-enter the decoder, so no borrow is held across them.
        let config = self.config.borrow().clone();
        match (&self.output, config.as_ref()) {
            (Output::Audio(callbacks), Some(DecoderConfig::Audio(config))) => {
                let samples = chunk
                    .data
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                callbacks.emit(AudioData::new(
                    chunk.timestamp,
                    config.sample_rate,
                    config.number_of_channels,
                    samples,
                ));
            }
            (Output::Video(callbacks), Some(DecoderConfig::Video(config))) => {
                callbacks.emit(VideoFrame {
                    timestamp: chunk.timestamp,
                    duration: chunk.duration,
                    display_width: u32::from(config.coded_width),
                    display_height: u32::from(config.coded_height),
                    data: chunk.data,
                });
            }
            // configure() rejects mismatched configurations
            _ => return,
        }
        self.decoded.set(self.decoded.get() + 1);
    }

    fn fail(&self, error: BridgeError) {
        match &self.output {
            Output::Audio(callbacks) => callbacks.fail(error),
            Output::Video(callbacks) => callbacks.fail(error),
        }
    }
}

#[async_trait(?Send)]
impl MediaDecoder for SoftwareDecoder {
    fn state(&self) -> CodecState {
        self.state.get()
    }

    fn configure(&self, config: &DecoderConfig) -> Result<()> {
        if self.state.get() == CodecState::Closed {
            return Err(BridgeError::InvalidState("configure on closed decoder".into()));
        }
        if config.is_audio() != self.is_audio() {
            return Err(BridgeError::Unsupported(format!(
                "{} configuration on a decoder of the other kind",
                config.codec()
            )));
        }

        debug!(codec = config.codec(), "Configured software decoder");
        *self.config.borrow_mut() = Some(config.clone());
        self.state.set(CodecState::Configured);
        Ok(())
    }

    fn decode(&self, chunk: EncodedChunk) -> Result<()> {
        if self.state.get() != CodecState::Configured {
            return Err(BridgeError::InvalidState(format!(
                "decode in state {:?}",
                self.state.get()
            )));
        }

        let injected = self.injected_error.borrow_mut().take();
        if let Some(error) = injected {
            self.fail(error);
            return Ok(());
        }

        trace!(timestamp = ?chunk.timestamp, bytes = chunk.data.len(), "Decoding chunk");
        self.emit(chunk);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        if self.state.get() != CodecState::Configured {
            return Err(BridgeError::InvalidState(format!(
                "flush in state {:?}",
                self.state.get()
            )));
        }
        self.flushes.set(self.flushes.get() + 1);

        // Output is produced synchronously, so a flush only has to give a
        // concurrent close the chance to abort it.
        core_async::task::yield_now().await;

        if self.state.get() == CodecState::Closed {
            return Err(BridgeError::Aborted("flush interrupted by close".into()));
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.state.get() == CodecState::Closed {
            return Err(BridgeError::InvalidState("decoder already closed".into()));
        }
        self.state.set(CodecState::Closed);
        self.closes.set(self.closes.get() + 1);
        debug!("Closed software decoder");
        Ok(())
    }
}

impl fmt::Debug for SoftwareDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareDecoder")
            .field("audio", &self.is_audio())
            .field("state", &self.state.get())
            .field("decoded", &self.decoded.get())
            .finish()
    }
}
