//! Software media platform.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    AudioData, AudioDecoderConfig, DecoderCallbacks, MediaDecoder, MediaPlatform,
    VideoDecoderConfig, VideoFrame,
};
#[cfg(any(test, feature = "inspect"))]
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use tracing::debug;

use crate::decoder::SoftwareDecoder;

const DEFAULT_AUDIO_CODECS: &[&str] = &["opus", "mp4a", "pcm-f32"];
const DEFAULT_VIDEO_CODECS: &[&str] = &["avc1", "vp8", "vp09", "raw"];

/// [`MediaPlatform`] backed by [`SoftwareDecoder`]s.
///
/// The supported-codec sets are configurable. An entry matches a codec
/// string exactly or as its family prefix, so `"avc1"` accepts
/// `"avc1.64001f"`.
///
/// With the `inspect` feature the platform also keeps every decoder it
/// creates, for [`created_decoders`](Self::created_decoders) and friends.
/// Without it nothing is retained after the caller drops a decoder.
///
/// # Example
///
/// ```ignore
/// use bridge_desktop::SoftwarePlatform;
///
/// let platform = SoftwarePlatform::new().with_video_codecs(["vp8"]);
/// ```
#[derive(Debug)]
pub struct SoftwarePlatform {
    audio_codecs: BTreeSet<String>,
    video_codecs: BTreeSet<String>,
    decoding_available: bool,
    #[cfg(any(test, feature = "inspect"))]
    created: RefCell<Vec<Rc<SoftwareDecoder>>>,
}

impl Default for SoftwarePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwarePlatform {
    pub fn new() -> Self {
        Self {
            audio_codecs: DEFAULT_AUDIO_CODECS.iter().map(|c| c.to_string()).collect(),
            video_codecs: DEFAULT_VIDEO_CODECS.iter().map(|c| c.to_string()).collect(),
            decoding_available: true,
            #[cfg(any(test, feature = "inspect"))]
            created: RefCell::new(Vec::new()),
        }
    }

    /// Replace the supported audio codec set.
    pub fn with_audio_codecs<I, S>(mut self, codecs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audio_codecs = codecs.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the supported video codec set.
    pub fn with_video_codecs<I, S>(mut self, codecs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.video_codecs = codecs.into_iter().map(Into::into).collect();
        self
    }

    /// A platform that cannot construct decoders at all.
    pub fn without_decoding(mut self) -> Self {
        self.decoding_available = false;
        self
    }

    /// Every decoder created so far, in creation order.
    #[cfg(any(test, feature = "inspect"))]
    pub fn created_decoders(&self) -> Vec<Rc<SoftwareDecoder>> {
        self.created.borrow().clone()
    }

    #[cfg(any(test, feature = "inspect"))]
    pub fn audio_decoders(&self) -> Vec<Rc<SoftwareDecoder>> {
        self.created
            .borrow()
            .iter()
            .filter(|d| d.is_audio())
            .cloned()
            .collect()
    }

    #[cfg(any(test, feature = "inspect"))]
    pub fn video_decoders(&self) -> Vec<Rc<SoftwareDecoder>> {
        self.created
            .borrow()
            .iter()
            .filter(|d| !d.is_audio())
            .cloned()
            .collect()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.decoding_available {
            Ok(())
        } else {
            Err(BridgeError::NotAvailable("software decoding disabled".into()))
        }
    }

    fn track(&self, decoder: Rc<SoftwareDecoder>) -> Rc<dyn MediaDecoder> {
        #[cfg(any(test, feature = "inspect"))]
        self.created.borrow_mut().push(Rc::clone(&decoder));
        decoder
    }
}

fn codec_matches(supported: &BTreeSet<String>, codec: &str) -> bool {
    let family = codec.split('.').next().unwrap_or(codec);
    supported.contains(codec) || supported.contains(family)
}

#[async_trait(?Send)]
impl MediaPlatform for SoftwarePlatform {
    fn supports_decoding(&self) -> bool {
        self.decoding_available
    }

    async fn is_audio_config_supported(&self, config: &AudioDecoderConfig) -> Result<bool> {
        self.ensure_available()?;
        let supported = codec_matches(&self.audio_codecs, &config.codec)
            && config.sample_rate > 0
            && config.number_of_channels > 0;
        debug!(codec = %config.codec, supported, "Audio configuration query");
        Ok(supported)
    }

    async fn is_video_config_supported(&self, config: &VideoDecoderConfig) -> Result<bool> {
        self.ensure_available()?;
        let supported = codec_matches(&self.video_codecs, &config.codec)
            && config.coded_width > 0
            && config.coded_height > 0;
        debug!(codec = %config.codec, supported, "Video configuration query");
        Ok(supported)
    }

    fn create_audio_decoder(
        &self,
        callbacks: DecoderCallbacks<AudioData>,
    ) -> Result<Rc<dyn MediaDecoder>> {
        self.ensure_available()?;
        Ok(self.track(SoftwareDecoder::audio(callbacks)))
    }

    fn create_video_decoder(
        &self,
        callbacks: DecoderCallbacks<VideoFrame>,
    ) -> Result<Rc<dyn MediaDecoder>> {
        self.ensure_available()?;
        Ok(self.track(SoftwareDecoder::video(callbacks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::{ChunkMetadata, CodecState, DecoderConfig, EncodedChunk};
    use bytes::Bytes;
    use std::cell::RefCell;

    fn pcm(samples: &[f32]) -> Bytes {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect::<Vec<_>>().into()
    }

    #[core_async::test]
    async fn test_codec_family_matching() {
        let platform = SoftwarePlatform::new().with_video_codecs(["avc1"]);

        let h264 = VideoDecoderConfig::new("avc1.64001f", 640, 360);
        let vp8 = VideoDecoderConfig::new("vp8", 640, 360);
        let zero = VideoDecoderConfig::new("avc1.64001f", 0, 360);

        assert!(platform.is_video_config_supported(&h264).await.unwrap());
        assert!(!platform.is_video_config_supported(&vp8).await.unwrap());
        assert!(!platform.is_video_config_supported(&zero).await.unwrap());

        let opus = AudioDecoderConfig::new("opus", 48_000, 2);
        assert!(platform.is_audio_config_supported(&opus).await.unwrap());
    }

    #[core_async::test]
    async fn test_disabled_platform() {
        let platform = SoftwarePlatform::new().without_decoding();
        assert!(!platform.supports_decoding());

        let opus = AudioDecoderConfig::new("opus", 48_000, 2);
        assert!(platform.is_audio_config_supported(&opus).await.is_err());
        assert!(platform
            .create_audio_decoder(DecoderCallbacks::new(|_| {}, |_| {}))
            .is_err());
    }

    #[core_async::test]
    async fn test_audio_decoder_emits_pcm() {
        let platform = SoftwarePlatform::new();
        let output = Rc::new(RefCell::new(Vec::new()));
        let sink = output.clone();
        let decoder = platform
            .create_audio_decoder(DecoderCallbacks::new(
                move |data: AudioData| sink.borrow_mut().push(data),
                |_| {},
            ))
            .unwrap();

        let chunk = EncodedChunk::new(&ChunkMetadata::key(0, 20), pcm(&[0.25, -0.5]));
        assert!(matches!(
            decoder.decode(chunk.clone()),
            Err(BridgeError::InvalidState(_))
        ));

        decoder
            .configure(&DecoderConfig::Audio(AudioDecoderConfig::new("opus", 48_000, 1)))
            .unwrap();
        decoder.decode(chunk).unwrap();

        let output = output.borrow();
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].samples, vec![0.25, -0.5]);
        assert_eq!(output[0].sample_rate, 48_000);
        assert_eq!(platform.audio_decoders()[0].decoded_chunks(), 1);
    }

    #[core_async::test]
    async fn test_close_aborts_pending_flush() {
        let platform = SoftwarePlatform::new();
        let decoder = platform
            .create_video_decoder(DecoderCallbacks::new(|_| {}, |_| {}))
            .unwrap();
        decoder
            .configure(&DecoderConfig::Video(VideoDecoderConfig::new("vp8", 32, 32)))
            .unwrap();

        let flushing = decoder.clone();
        let flush = core_async::spawn_local(async move { flushing.flush().await });
        core_async::yield_now().await;
        decoder.close().unwrap();

        let result = flush.await.unwrap();
        assert!(matches!(result, Err(ref e) if e.is_abort()));
        assert_eq!(decoder.state(), CodecState::Closed);
        assert!(matches!(decoder.close(), Err(BridgeError::InvalidState(_))));
        assert_eq!(platform.video_decoders()[0].close_count(), 1);
    }

    #[core_async::test]
    async fn test_injected_error_goes_to_error_callback() {
        let platform = SoftwarePlatform::new();
        let errors = Rc::new(RefCell::new(Vec::new()));
        let seen = errors.clone();
        let decoder = platform
            .create_video_decoder(DecoderCallbacks::new(
                |_| {},
                move |err| seen.borrow_mut().push(err),
            ))
            .unwrap();
        decoder
            .configure(&DecoderConfig::Video(VideoDecoderConfig::new("vp8", 32, 32)))
            .unwrap();

        platform.video_decoders()[0].inject_error(BridgeError::DecodeFailed("bitstream".into()));
        decoder
            .decode(EncodedChunk::new(&ChunkMetadata::key(0, 33), Bytes::from_static(b"x")))
            .unwrap();

        assert_eq!(
            *errors.borrow(),
            vec![BridgeError::DecodeFailed("bitstream".into())]
        );
    }

    #[test]
    fn test_registry_is_the_only_retained_reference() {
        let platform = SoftwarePlatform::new();
        let decoder = platform
            .create_audio_decoder(DecoderCallbacks::new(|_| {}, |_| {}))
            .unwrap();
        let weak = Rc::downgrade(&decoder);
        drop(decoder);

        // The inspection registry is the only other owner.
        assert!(weak.upgrade().is_some());
        platform.created.borrow_mut().clear();
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_configure_rejects_other_kind() {
        let platform = SoftwarePlatform::new();
        let decoder = platform
            .create_audio_decoder(DecoderCallbacks::new(|_| {}, |_| {}))
            .unwrap();
        let result =
            decoder.configure(&DecoderConfig::Video(VideoDecoderConfig::new("vp8", 32, 32)));
        assert!(matches!(result, Err(BridgeError::Unsupported(_))));
    }
}
