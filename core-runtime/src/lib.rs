//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the media stream host:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Lifecycle event bus
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the playback engine depends on.
//! It establishes the logging conventions, the fail-fast configuration
//! builder, and the event broadcasting used to observe session lifecycles.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
