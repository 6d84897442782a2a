//! # Desktop Bridge Implementations
//!
//! Native implementations of the host bridge traits.
//!
//! ## Overview
//!
//! - [`SoftwarePlatform`]: a [`MediaPlatform`](bridge_traits::MediaPlatform)
//!   with a configurable supported-codec set, handing out
//!   [`SoftwareDecoder`]s
//! - [`SoftwareDecoder`]: pass-through decoder (f32 PCM audio, raw video
//!   frames) with the lifecycle of a platform codec, plus hooks for
//!   injecting decode errors and counting flushes and closes
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::SoftwarePlatform;
//! use core_runtime::config::CoreConfig;
//! use std::rc::Rc;
//!
//! let config = CoreConfig::builder()
//!     .platform(Rc::new(SoftwarePlatform::new()))
//!     .build()?;
//! ```

mod decoder;
mod platform;

pub use decoder::SoftwareDecoder;
pub use platform::SoftwarePlatform;
