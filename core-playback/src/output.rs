//! Session outputs.
//!
//! Every session gets one sink per media kind it plays. The engine writes
//! decoded output into the sink half; the host holds the consumer half in an
//! [`OutputStream`].
//!
//! - Audio: [`AudioRenderSink`] pushes samples into a [`RenderRingBuffer`]
//!   that [`AudioTrack::render`] drains at the render clock's pace.
//! - Video: [`VideoFrameSink`] forwards frames over a channel to
//!   [`VideoTrack`].
//!
//! Stopping or dropping a track closes its sink from the consumer side. The
//! next write then fails with `SinkClosed`, which the engine treats as the
//! end of the session.

use async_trait::async_trait;
use bridge_traits::{AudioData, BridgeError, MediaSink, VideoFrame};
use core_async::sync::mpsc;
use core_ffi::SessionId;
use std::cell::RefCell;
use tracing::debug;

use crate::ring_buffer::RenderRingBuffer;

/// Channel layout and rate of a session's audio track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub channels: u16,
    pub sample_rate: u32,
}

// ============================================================================
// Audio
// ============================================================================

/// Writer half of a session's audio output.
#[derive(Debug)]
pub struct AudioRenderSink {
    buffer: RenderRingBuffer,
}

impl AudioRenderSink {
    pub fn new(buffer: RenderRingBuffer) -> Self {
        Self { buffer }
    }
}

#[async_trait(?Send)]
impl MediaSink<AudioData> for AudioRenderSink {
    async fn write(&self, data: AudioData) -> Result<(), BridgeError> {
        self.buffer.push(data.samples)
    }

    async fn close(&self) -> Result<(), BridgeError> {
        if self.buffer.is_closed() {
            return Err(BridgeError::SinkClosed);
        }
        self.buffer.close();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.buffer.is_closed()
    }
}

/// Consumer half of a session's audio output.
///
/// `AudioTrack` is `Send`, so a host can move it onto its audio thread and
/// call [`render`](Self::render) from the device callback.
#[derive(Debug)]
pub struct AudioTrack {
    format: AudioFormat,
    buffer: RenderRingBuffer,
}

impl AudioTrack {
    pub fn new(format: AudioFormat, buffer: RenderRingBuffer) -> Self {
        Self { format, buffer }
    }

    pub fn channels(&self) -> u16 {
        self.format.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Render one tick into planar channel buffers. Never blocks; missing
    /// samples are rendered as silence.
    pub fn render(&self, channels: &mut [&mut [f32]]) -> usize {
        self.buffer.render(channels)
    }

    /// Render one tick into an interleaved buffer.
    pub fn render_interleaved(&self, output: &mut [f32]) -> usize {
        self.buffer.fill(output)
    }

    /// The session closed the track and everything queued was rendered.
    pub fn is_ended(&self) -> bool {
        self.buffer.is_closed() && self.buffer.is_empty()
    }

    pub fn buffer(&self) -> &RenderRingBuffer {
        &self.buffer
    }

    /// Stop consuming. Queued samples are discarded and further writes fail.
    pub fn stop(&self) {
        if !self.buffer.is_closed() {
            debug!("Audio track stopped by consumer");
        }
        self.buffer.close();
        self.buffer.clear();
    }
}

impl Drop for AudioTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Video
// ============================================================================

/// Writer half of a session's video output.
#[derive(Debug)]
pub struct VideoFrameSink {
    sender: RefCell<Option<mpsc::UnboundedSender<VideoFrame>>>,
}

impl VideoFrameSink {
    /// Create a connected sink and track pair.
    pub fn channel() -> (Self, VideoTrack) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                sender: RefCell::new(Some(tx)),
            },
            VideoTrack { receiver: rx },
        )
    }
}

#[async_trait(?Send)]
impl MediaSink<VideoFrame> for VideoFrameSink {
    async fn write(&self, frame: VideoFrame) -> Result<(), BridgeError> {
        let sender = self.sender.borrow();
        let sender = sender.as_ref().ok_or(BridgeError::SinkClosed)?;
        sender.send(frame).map_err(|_| BridgeError::SinkClosed)
    }

    async fn close(&self) -> Result<(), BridgeError> {
        match self.sender.borrow_mut().take() {
            Some(sender) if !sender.is_closed() => Ok(()),
            _ => Err(BridgeError::SinkClosed),
        }
    }

    fn is_closed(&self) -> bool {
        self.sender
            .borrow()
            .as_ref()
            .map_or(true, |sender| sender.is_closed())
    }
}

/// Consumer half of a session's video output.
#[derive(Debug)]
pub struct VideoTrack {
    receiver: mpsc::UnboundedReceiver<VideoFrame>,
}

impl VideoTrack {
    /// Next decoded frame, or `None` once the session closed the track and
    /// every frame was received.
    pub async fn recv(&mut self) -> Option<VideoFrame> {
        self.receiver.recv().await
    }

    /// Next frame if one is ready.
    pub fn try_recv(&mut self) -> Option<VideoFrame> {
        self.receiver.try_recv().ok()
    }

    /// Stop consuming. Further writes fail with `SinkClosed`.
    pub fn stop(&mut self) {
        self.receiver.close();
    }
}

// ============================================================================
// Output stream
// ============================================================================

/// The tracks of one session, returned by `play`.
///
/// Tracks are present for the media kinds the container has. Their sinks
/// fill once the core creates decoders for the session.
#[derive(Debug)]
pub struct OutputStream {
    pub session: SessionId,
    pub audio: Option<AudioTrack>,
    pub video: Option<VideoTrack>,
}

impl OutputStream {
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    /// Stop both tracks. The engine notices on its next write and ends the
    /// session.
    pub fn stop(&mut self) {
        if let Some(audio) = &self.audio {
            audio.stop();
        }
        if let Some(video) = &mut self.video {
            video.stop();
        }
    }
}
