//! # Render Ring Buffer for Decoded Audio
//!
//! Bridges decoded audio, which arrives one chunk at a time whenever the
//! decoder produces it, to the audio render clock, which asks for a fixed
//! number of samples on every tick.
//!
//! ## Design
//!
//! - **Producer**: the session's audio sink pushes whole chunks of
//!   interleaved samples. Each queued chunk keeps its own read cursor.
//! - **Consumer**: the render callback pulls samples one slot at a time and
//!   pops a chunk once its cursor reaches the end.
//! - **Underrun**: an empty queue renders silence. This is the steady state
//!   whenever decoding runs slightly behind real time and is not an error.
//! - **Never blocks the clock**: `render` only uses `try_lock`. A tick that
//!   finds the producer holding the lock renders silence instead of waiting.
//! - **Bound**: unbounded by default. With a bound, the oldest chunk is
//!   dropped to make room for a new one.
//!
//! ## Usage
//!
//! ```rust
//! use core_playback::ring_buffer::RenderRingBuffer;
//!
//! let buffer = RenderRingBuffer::new();
//! buffer.push(vec![0.25, 0.5, 0.75]).unwrap();
//!
//! let mut output = [1.0f32; 5];
//! let rendered = buffer.fill(&mut output);
//!
//! assert_eq!(rendered, 3);
//! assert_eq!(output, [0.25, 0.5, 0.75, 0.0, 0.0]);
//! ```

use bridge_traits::BridgeError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Queue of decoded audio chunks drained at a fixed rate.
///
/// Clones share the same queue, so the producer and the consumer each hold
/// one. The buffer is `Send + Sync` and the consumer half may live on the
/// realtime audio thread.
#[derive(Clone)]
pub struct RenderRingBuffer {
    inner: Arc<RenderRingBufferInner>,
}

struct RenderRingBufferInner {
    state: Mutex<QueueState>,
    max_chunks: Option<usize>,
    // Counted outside the lock so a contended tick can still record itself.
    underrun_samples: AtomicU64,
}

struct QueueState {
    chunks: VecDeque<QueuedChunk>,
    queued_samples: usize,
    dropped_chunks: u64,
    closed: bool,
}

struct QueuedChunk {
    samples: Vec<f32>,
    cursor: usize,
}

impl QueueState {
    fn next_sample(&mut self) -> Option<f32> {
        let chunk = self.chunks.front_mut()?;
        let sample = chunk.samples[chunk.cursor];
        chunk.cursor += 1;
        if chunk.cursor == chunk.samples.len() {
            self.chunks.pop_front();
        }
        self.queued_samples -= 1;
        Some(sample)
    }
}

impl RenderRingBuffer {
    /// Create an unbounded buffer.
    pub fn new() -> Self {
        Self::with_max_chunks(None)
    }

    /// Create a buffer holding at most `max_chunks` chunks, or an unbounded
    /// one for `None`.
    pub fn with_max_chunks(max_chunks: Option<usize>) -> Self {
        Self {
            inner: Arc::new(RenderRingBufferInner {
                state: Mutex::new(QueueState {
                    chunks: VecDeque::new(),
                    queued_samples: 0,
                    dropped_chunks: 0,
                    closed: false,
                }),
                max_chunks,
                underrun_samples: AtomicU64::new(0),
            }),
        }
    }

    /// Append a chunk of decoded samples.
    ///
    /// Empty chunks are ignored. When the buffer is bounded and full, the
    /// oldest chunk (including any partly rendered one) is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SinkClosed`] once the buffer is closed.
    pub fn push(&self, samples: Vec<f32>) -> Result<(), BridgeError> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(BridgeError::SinkClosed);
        }
        if samples.is_empty() {
            return Ok(());
        }

        if let Some(max) = self.inner.max_chunks {
            while state.chunks.len() >= max {
                let Some(oldest) = state.chunks.pop_front() else {
                    break;
                };
                state.queued_samples -= oldest.samples.len() - oldest.cursor;
                state.dropped_chunks += 1;
                trace!(dropped = state.dropped_chunks, "Render queue full, dropped oldest chunk");
            }
        }

        state.queued_samples += samples.len();
        state.chunks.push_back(QueuedChunk { samples, cursor: 0 });
        Ok(())
    }

    /// Render one tick into planar channel buffers.
    ///
    /// Queued samples are interleaved, so each frame slot takes one sample
    /// per channel in channel order. Slots the queue cannot cover are zeroed.
    /// Channels are rendered up to the length of the shortest one; anything
    /// beyond it is zeroed.
    ///
    /// Returns the number of samples taken from the queue.
    pub fn render(&self, channels: &mut [&mut [f32]]) -> usize {
        let frames = channels.iter().map(|c| c.len()).min().unwrap_or(0);
        let total: usize = channels.iter().map(|c| c.len()).sum();

        let Some(mut state) = self.inner.state.try_lock() else {
            for channel in channels.iter_mut() {
                channel.fill(0.0);
            }
            self.record_underrun(total);
            return 0;
        };

        let mut rendered = 0;
        for frame in 0..frames {
            for channel in channels.iter_mut() {
                channel[frame] = match state.next_sample() {
                    Some(sample) => {
                        rendered += 1;
                        sample
                    }
                    None => 0.0,
                };
            }
        }
        drop(state);

        for channel in channels.iter_mut() {
            channel[frames..].fill(0.0);
        }
        self.record_underrun(total - rendered);
        rendered
    }

    /// Fill an interleaved buffer, zeroing whatever the queue cannot cover.
    ///
    /// Returns the number of samples taken from the queue.
    pub fn fill(&self, output: &mut [f32]) -> usize {
        let Some(mut state) = self.inner.state.try_lock() else {
            output.fill(0.0);
            self.record_underrun(output.len());
            return 0;
        };

        let mut rendered = 0;
        for slot in output.iter_mut() {
            *slot = match state.next_sample() {
                Some(sample) => {
                    rendered += 1;
                    sample
                }
                None => 0.0,
            };
        }
        drop(state);

        self.record_underrun(output.len() - rendered);
        rendered
    }

    fn record_underrun(&self, samples: usize) {
        if samples > 0 {
            self.inner
                .underrun_samples
                .fetch_add(samples as u64, Ordering::Relaxed);
        }
    }

    /// Reject further pushes. Queued samples can still be rendered.
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Discard every queued chunk.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.chunks.clear();
        state.queued_samples = 0;
    }

    /// Number of chunks waiting, including a partly rendered one.
    pub fn queued_chunks(&self) -> usize {
        self.inner.state.lock().chunks.len()
    }

    /// Number of samples not yet rendered.
    pub fn queued_samples(&self) -> usize {
        self.inner.state.lock().queued_samples
    }

    /// Returns `true` if nothing is waiting to be rendered.
    pub fn is_empty(&self) -> bool {
        self.queued_samples() == 0
    }

    /// Sample slots rendered as silence because the queue was empty or
    /// contended.
    pub fn underrun_samples(&self) -> u64 {
        self.inner.underrun_samples.load(Ordering::Relaxed)
    }

    /// Chunks discarded to respect the bound.
    pub fn dropped_chunks(&self) -> u64 {
        self.inner.state.lock().dropped_chunks
    }

    pub fn max_chunks(&self) -> Option<usize> {
        self.inner.max_chunks
    }
}

impl Default for RenderRingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RenderRingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RenderRingBuffer")
            .field("queued_chunks", &state.chunks.len())
            .field("queued_samples", &state.queued_samples)
            .field("max_chunks", &self.inner.max_chunks)
            .field("closed", &state.closed)
            .finish()
    }
}
