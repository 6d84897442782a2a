//! Media types exchanged between the core, the host and decoder backends.
//!
//! Decoder configurations and chunk metadata cross the core boundary as JSON,
//! so their serde layout is part of the wire contract (camelCase field names,
//! `"type": "key" | "delta"` for chunks, millisecond integers for time).

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Audio decoder configuration extracted from the container by the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDecoderConfig {
    /// Codec string, e.g. `"opus"` or `"mp4a.40.2"`.
    pub codec: String,
    /// Sample rate in hertz.
    pub sample_rate: u32,
    /// Number of interleaved channels in decoded output.
    pub number_of_channels: u16,
}

impl AudioDecoderConfig {
    pub fn new(codec: impl Into<String>, sample_rate: u32, number_of_channels: u16) -> Self {
        Self {
            codec: codec.into(),
            sample_rate,
            number_of_channels,
        }
    }
}

/// Video decoder configuration extracted from the container by the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDecoderConfig {
    /// Codec string, e.g. `"avc1.64001f"` or `"vp8"`.
    pub codec: String,
    /// Codec-specific extradata (the avcC payload for H.264). Serialized as a
    /// JSON array of byte values.
    #[serde(default)]
    pub description: Vec<u8>,
    pub coded_width: u16,
    pub coded_height: u16,
}

impl VideoDecoderConfig {
    pub fn new(codec: impl Into<String>, coded_width: u16, coded_height: u16) -> Self {
        Self {
            codec: codec.into(),
            description: Vec::new(),
            coded_width,
            coded_height,
        }
    }

    pub fn with_description(mut self, description: Vec<u8>) -> Self {
        self.description = description;
        self
    }
}

/// Either decoder configuration, as handed to [`MediaDecoder::configure`].
///
/// [`MediaDecoder::configure`]: crate::decoder::MediaDecoder::configure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderConfig {
    Audio(AudioDecoderConfig),
    Video(VideoDecoderConfig),
}

impl DecoderConfig {
    pub fn codec(&self) -> &str {
        match self {
            DecoderConfig::Audio(config) => &config.codec,
            DecoderConfig::Video(config) => &config.codec,
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, DecoderConfig::Audio(_))
    }
}

/// Whether a chunk can be decoded on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Key,
    Delta,
}

/// Timing metadata the core attaches to every `decode` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    /// Presentation timestamp in milliseconds.
    pub timestamp: u32,
    /// Duration in milliseconds.
    pub duration: u32,
}

impl ChunkMetadata {
    pub fn key(timestamp: u32, duration: u32) -> Self {
        Self {
            chunk_type: ChunkType::Key,
            timestamp,
            duration,
        }
    }

    pub fn delta(timestamp: u32, duration: u32) -> Self {
        Self {
            chunk_type: ChunkType::Delta,
            timestamp,
            duration,
        }
    }
}

/// One unit of encoded media, owned by the host.
///
/// `data` is always a private copy: the bytes referenced by a `decode`
/// command live in memory the core may reuse as soon as the command returns.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedChunk {
    pub chunk_type: ChunkType,
    pub timestamp: Duration,
    pub duration: Duration,
    pub data: Bytes,
}

impl EncodedChunk {
    pub fn new(metadata: &ChunkMetadata, data: Bytes) -> Self {
        Self {
            chunk_type: metadata.chunk_type,
            timestamp: Duration::from_millis(u64::from(metadata.timestamp)),
            duration: Duration::from_millis(u64::from(metadata.duration)),
            data,
        }
    }

    pub fn is_key(&self) -> bool {
        self.chunk_type == ChunkType::Key
    }
}

/// Decoded PCM audio: interleaved f32 samples in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioData {
    pub timestamp: Duration,
    pub sample_rate: u32,
    pub number_of_channels: u16,
    /// Interleaved samples, `number_of_frames() * number_of_channels` long.
    pub samples: Vec<f32>,
}

impl AudioData {
    pub fn new(
        timestamp: Duration,
        sample_rate: u32,
        number_of_channels: u16,
        samples: Vec<f32>,
    ) -> Self {
        Self {
            timestamp,
            sample_rate,
            number_of_channels,
            samples,
        }
    }

    /// Number of frames (one sample per channel).
    pub fn number_of_frames(&self) -> usize {
        if self.number_of_channels == 0 {
            return 0;
        }
        self.samples.len() / usize::from(self.number_of_channels)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A decoded video frame.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub timestamp: Duration,
    pub duration: Duration,
    pub display_width: u32,
    pub display_height: u32,
    /// Pixel payload in whatever layout the decoder backend produces.
    pub data: Bytes,
}
