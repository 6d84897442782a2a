//! # Host Bridge Traits
//!
//! Platform abstraction traits the media stream host consumes.
//!
//! ## Overview
//!
//! The coordination layer never decodes or renders anything itself. It asks
//! the host platform whether a decoder configuration is supported, asks it to
//! construct decoders, and hands decoded output to sinks. Each of those
//! capabilities is a trait here so the engine can run against a browser-like
//! codec stack, a native software decoder, or a test double.
//!
//! ## Traits
//!
//! ### Decoding
//! - [`MediaPlatform`](decoder::MediaPlatform) - capability queries and decoder construction
//! - [`MediaDecoder`](decoder::MediaDecoder) - configure / decode / flush / close
//!
//! ### Output
//! - [`MediaSink`](sink::MediaSink) - append-only destination for decoded output
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - monotonic time source served to the core
//! - [`LoggerSink`](time::LoggerSink) - forward structured logs to host logging
//!
//! ## Threading
//!
//! Decoders, platforms and sinks are driven from a single thread and are
//! shared through `Rc`, so their traits use `async_trait(?Send)`. Only
//! [`LoggerSink`](time::LoggerSink) is `Send + Sync`, because it is installed
//! into the global `tracing` subscriber.
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Two variants
//! carry meaning for the caller rather than just a message:
//!
//! - `Aborted`: an operation was cut short by a concurrent close. Expected
//!   during teardown races.
//! - `SinkClosed`: the consumer side of a sink went away. A normal
//!   termination trigger, not a failure.

pub mod decoder;
pub mod error;
pub mod media;
pub mod sink;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use decoder::{CodecState, DecoderCallbacks, MediaDecoder, MediaPlatform};
pub use media::{
    AudioData, AudioDecoderConfig, ChunkMetadata, ChunkType, DecoderConfig, EncodedChunk,
    VideoDecoderConfig, VideoFrame,
};
pub use sink::MediaSink;
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, SystemClock};
