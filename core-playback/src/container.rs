//! Container information reported by the core at load time.

use bridge_traits::{AudioDecoderConfig, MediaPlatform, VideoDecoderConfig};
use core_ffi::DecoderKind;
use core_runtime::config::PlaybackConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PlaybackError, Result};
use crate::output::AudioFormat;

/// Decoder configurations the core extracted from the container.
///
/// Only the first audio and the first video configuration are played; the
/// rest are still validated so a container the host cannot fully decode is
/// rejected up front.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    #[serde(default)]
    pub audio_configs: Vec<AudioDecoderConfig>,
    #[serde(default)]
    pub video_configs: Vec<VideoDecoderConfig>,
}

impl ContainerInfo {
    pub fn has_audio(&self) -> bool {
        !self.audio_configs.is_empty()
    }

    pub fn has_video(&self) -> bool {
        !self.video_configs.is_empty()
    }

    pub fn has(&self, kind: DecoderKind) -> bool {
        match kind {
            DecoderKind::Audio => self.has_audio(),
            DecoderKind::Video => self.has_video(),
        }
    }

    pub fn audio_config(&self) -> Option<&AudioDecoderConfig> {
        self.audio_configs.first()
    }

    pub fn video_config(&self) -> Option<&VideoDecoderConfig> {
        self.video_configs.first()
    }

    /// Format of the audio track: taken from the first audio configuration,
    /// or from the playback defaults when there is none.
    pub fn audio_format(&self, playback: &PlaybackConfig) -> AudioFormat {
        match self.audio_config() {
            Some(config) => AudioFormat {
                channels: config.number_of_channels,
                sample_rate: config.sample_rate,
            },
            None => AudioFormat {
                channels: playback.default_channels,
                sample_rate: playback.default_sample_rate,
            },
        }
    }

    /// Check every configuration against the platform.
    ///
    /// # Errors
    ///
    /// Fails with [`PlaybackError::UnsupportedConfiguration`] on the first
    /// configuration the platform cannot decode, or
    /// [`PlaybackError::Platform`] if the capability query itself fails.
    pub async fn validate(&self, platform: &dyn MediaPlatform) -> Result<()> {
        for config in &self.audio_configs {
            let supported = platform
                .is_audio_config_supported(config)
                .await
                .map_err(PlaybackError::Platform)?;
            if !supported {
                return Err(unsupported(DecoderKind::Audio, config, &config.codec));
            }
            debug!(codec = %config.codec, "Audio configuration supported");
        }

        for config in &self.video_configs {
            let supported = platform
                .is_video_config_supported(config)
                .await
                .map_err(PlaybackError::Platform)?;
            if !supported {
                return Err(unsupported(DecoderKind::Video, config, &config.codec));
            }
            debug!(codec = %config.codec, "Video configuration supported");
        }

        Ok(())
    }
}

fn unsupported<C: Serialize>(kind: DecoderKind, config: &C, codec: &str) -> PlaybackError {
    PlaybackError::UnsupportedConfiguration {
        kind,
        config: serde_json::to_string(config).unwrap_or_else(|_| codec.to_string()),
    }
}
