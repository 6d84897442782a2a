//! # Core Configuration Module
//!
//! Provides configuration management for the media stream host.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds the host bridges and playback settings the engine
//! needs. It enforces fail-fast validation so a missing decoding capability is
//! reported when the host is configured, not when the first decoder is
//! requested mid-playback.
//!
//! ## Required Dependencies
//!
//! - `MediaPlatform` - decoder capability queries and decoder construction
//!
//! ## Optional Dependencies (with defaults)
//!
//! - `Clock` - time source served to the core (default: `SystemClock`)
//!
//! When the `desktop-shims` feature is enabled, the software platform from
//! `bridge-desktop` is injected automatically if no `MediaPlatform` is
//! provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, PlaybackConfig};
//! use std::rc::Rc;
//!
//! let config = CoreConfig::builder()
//!     .platform(Rc::new(MyPlatform::new()))
//!     .playback(PlaybackConfig::default().with_max_queued_audio_chunks(64))
//!     .build()?;
//! ```
//!
//! ## Playback settings from JSON
//!
//! ```
//! use core_runtime::config::PlaybackConfig;
//!
//! let playback = PlaybackConfig::from_json_str(r#"{"default_sample_rate": 44100}"#).unwrap();
//! assert_eq!(playback.default_sample_rate, 44_100);
//! assert_eq!(playback.default_channels, 1);
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, MediaPlatform, SystemClock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

/// Default capacity of the lifecycle event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Host configuration.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Decoder capability and construction (required)
    pub platform: Rc<dyn MediaPlatform>,

    /// Time source answering the core's `now()` queries
    pub clock: Rc<dyn Clock>,

    pub playback: PlaybackConfig,

    /// Buffered lifecycle events per subscriber before lagging
    pub event_capacity: usize,
}

impl fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreConfig")
            .field("platform", &"MediaPlatform { ... }")
            .field("clock", &"Clock { ... }")
            .field("playback", &self.playback)
            .field("event_capacity", &self.event_capacity)
            .finish()
    }
}

/// Playback tuning.
///
/// Every field has a default, so a partial JSON document is valid input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Channel count of the audio track when the container has no audio
    /// configuration.
    pub default_channels: u16,

    /// Sample rate of the audio track when the container has no audio
    /// configuration.
    pub default_sample_rate: u32,

    /// Bound on decoded audio chunks waiting in a session's render buffer.
    /// `None` leaves the buffer unbounded. When bounded, the oldest chunk is
    /// dropped to make room.
    pub max_queued_audio_chunks: Option<usize>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_channels: 1,
            default_sample_rate: 48_000,
            max_queued_audio_chunks: None,
        }
    }
}

impl PlaybackConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid playback configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_queued_audio_chunks(mut self, max: usize) -> Self {
        self.max_queued_audio_chunks = Some(max);
        self
    }

    pub fn with_defaults(mut self, channels: u16, sample_rate: u32) -> Self {
        self.default_channels = channels;
        self.default_sample_rate = sample_rate;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_channels == 0 {
            return Err(Error::Config(
                "Default channel count must be greater than 0".to_string(),
            ));
        }

        if self.default_sample_rate == 0 {
            return Err(Error::Config(
                "Default sample rate must be greater than 0 Hz".to_string(),
            ));
        }

        if self.max_queued_audio_chunks == Some(0) {
            return Err(Error::Config(
                "Audio queue bound must be greater than 0 chunks. \
                 Leave it unset for an unbounded queue."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

impl CoreConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Playback settings are consistent
    /// - The event channel has room for at least one event
    /// - The platform can construct decoders at all
    pub fn validate(&self) -> Result<()> {
        self.playback.validate()?;

        if self.event_capacity == 0 {
            return Err(Error::Config(
                "Event capacity must be greater than 0".to_string(),
            ));
        }

        if !self.platform.supports_decoding() {
            return Err(Error::CapabilityMissing {
                capability: "MediaPlatform".to_string(),
                message: "The configured platform cannot construct decoders. \
                         Web: WebCodecs AudioDecoder and VideoDecoder must be available. \
                         Native: provide a platform with decoding enabled."
                    .to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_platform() -> Result<Rc<dyn MediaPlatform>> {
    Err(Error::CapabilityMissing {
        capability: "MediaPlatform".to_string(),
        message: "MediaPlatform implementation is required for decoding. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default SoftwarePlatform. \
                 Web: inject a WebCodecs-backed platform."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_platform() -> Result<Rc<dyn MediaPlatform>> {
    use bridge_desktop::SoftwarePlatform;

    let platform: Rc<dyn MediaPlatform> = Rc::new(SoftwarePlatform::new());
    Ok(platform)
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    platform: Option<Rc<dyn MediaPlatform>>,
    clock: Option<Rc<dyn Clock>>,
    playback: Option<PlaybackConfig>,
    event_capacity: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the media platform (required).
    pub fn platform(mut self, platform: Rc<dyn MediaPlatform>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Sets the clock. Default: [`SystemClock`].
    pub fn clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn playback(mut self, playback: PlaybackConfig) -> Self {
        self.playback = Some(playback);
        self
    }

    /// Sets the lifecycle event channel capacity.
    ///
    /// Default: 256
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] when no platform was provided (and no
    ///   default is available) or the platform cannot decode
    /// - [`Error::Config`] when a setting is out of range
    pub fn build(self) -> Result<CoreConfig> {
        let platform = match self.platform {
            Some(platform) => platform,
            None => provide_default_platform()?,
        };

        let config = CoreConfig {
            platform,
            clock: self
                .clock
                .unwrap_or_else(|| Rc::new(SystemClock::new()) as Rc<dyn Clock>),
            playback: self.playback.unwrap_or_default(),
            event_capacity: self.event_capacity.unwrap_or(DEFAULT_EVENT_CAPACITY),
        };

        config.validate()?;

        Ok(config)
    }
}
