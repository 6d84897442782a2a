//! Decoder bridge traits.
//!
//! The shape follows the browser codec model the core was designed against:
//! a decoder is constructed with an output callback and an error callback,
//! configured once, fed chunks synchronously, and drained with an
//! asynchronous `flush`. Output arrives through the callback, never as a
//! return value.

use crate::error::Result;
use crate::media::{AudioData, AudioDecoderConfig, DecoderConfig, EncodedChunk, VideoDecoderConfig, VideoFrame};
use std::fmt;
use std::rc::Rc;

/// Lifecycle state of a [`MediaDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecState {
    Unconfigured,
    Configured,
    Closed,
}

/// Callbacks a decoder invokes as output becomes available or decoding fails.
pub struct DecoderCallbacks<T> {
    output: Box<dyn Fn(T)>,
    error: Box<dyn Fn(crate::BridgeError)>,
}

impl<T> DecoderCallbacks<T> {
    pub fn new(
        output: impl Fn(T) + 'static,
        error: impl Fn(crate::BridgeError) + 'static,
    ) -> Self {
        Self {
            output: Box::new(output),
            error: Box::new(error),
        }
    }

    /// Deliver one decoded item.
    pub fn emit(&self, item: T) {
        (self.output)(item)
    }

    /// Report a fatal decoding error.
    pub fn fail(&self, error: crate::BridgeError) {
        (self.error)(error)
    }
}

impl<T> fmt::Debug for DecoderCallbacks<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderCallbacks").finish_non_exhaustive()
    }
}

/// A platform decoder instance.
///
/// Methods take `&self`: a decoder is shared between the session that owns it
/// and close routines that may be in flight concurrently, so implementations
/// use interior mutability.
#[async_trait::async_trait(?Send)]
pub trait MediaDecoder {
    /// Current lifecycle state.
    fn state(&self) -> CodecState;

    /// Configure the decoder. Must be called before the first `decode`.
    fn configure(&self, config: &DecoderConfig) -> Result<()>;

    /// Queue one chunk for decoding. Output is delivered through the
    /// decoder's output callback.
    fn decode(&self, chunk: EncodedChunk) -> Result<()>;

    /// Wait until every queued chunk has produced its output.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Aborted`](crate::BridgeError::Aborted) if the
    /// decoder is closed while the flush is pending.
    async fn flush(&self) -> Result<()>;

    /// Release the decoder. Pending work is discarded.
    fn close(&self) -> Result<()>;
}

/// Host platform decoding capability.
#[async_trait::async_trait(?Send)]
pub trait MediaPlatform {
    /// Whether the platform can construct decoders at all.
    fn supports_decoding(&self) -> bool {
        true
    }

    /// Ask whether an audio configuration can be decoded.
    async fn is_audio_config_supported(&self, config: &AudioDecoderConfig) -> Result<bool>;

    /// Ask whether a video configuration can be decoded.
    async fn is_video_config_supported(&self, config: &VideoDecoderConfig) -> Result<bool>;

    /// Construct an unconfigured audio decoder bound to `callbacks`.
    fn create_audio_decoder(
        &self,
        callbacks: DecoderCallbacks<AudioData>,
    ) -> Result<Rc<dyn MediaDecoder>>;

    /// Construct an unconfigured video decoder bound to `callbacks`.
    fn create_video_decoder(
        &self,
        callbacks: DecoderCallbacks<VideoFrame>,
    ) -> Result<Rc<dyn MediaDecoder>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BridgeError;
    use std::cell::RefCell;
    use std::time::Duration;

    #[test]
    fn callbacks_forward_output_and_errors() {
        let outputs = Rc::new(RefCell::new(Vec::new()));
        let errors = Rc::new(RefCell::new(Vec::new()));

        let callbacks = {
            let outputs = outputs.clone();
            let errors = errors.clone();
            DecoderCallbacks::new(
                move |data: AudioData| outputs.borrow_mut().push(data.samples.len()),
                move |err| errors.borrow_mut().push(err),
            )
        };

        callbacks.emit(AudioData::new(Duration::ZERO, 48_000, 1, vec![0.5; 3]));
        callbacks.fail(BridgeError::DecodeFailed("corrupt".into()));

        assert_eq!(*outputs.borrow(), vec![3]);
        assert_eq!(
            *errors.borrow(),
            vec![BridgeError::DecodeFailed("corrupt".into())]
        );
    }
}
