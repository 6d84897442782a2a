//! # Playback Module
//!
//! Host-side coordination of MP4 playback driven by the scheduling core.
//!
//! ## Overview
//!
//! This module handles:
//! - The [`Engine`]: session registry and the handlers for every command
//!   the core issues
//! - [`Session`]s: per-playback decoder and sink handles with race-tolerant
//!   teardown
//! - The [`RenderRingBuffer`](ring_buffer::RenderRingBuffer): decoded audio
//!   queued for a fixed-rate render clock
//! - Output tracks handed to the host by `play`
//! - Container capability validation at load time

pub mod container;
pub mod engine;
pub mod error;
pub mod output;
pub mod ring_buffer;
pub mod session;

pub use container::ContainerInfo;
pub use engine::Engine;
pub use error::{PlaybackError, Result};
pub use output::{AudioFormat, AudioTrack, OutputStream, VideoTrack};
pub use ring_buffer::RenderRingBuffer;
pub use session::Session;
