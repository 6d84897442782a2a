//! MP4 media stream facade.
//!
//! Plays a loaded MP4 container as any number of independent audio/video
//! streams. The demuxing and pacing is done by a scheduling core reached
//! through [`core_ffi::CoreScheduler`]; this crate wires the core to a host
//! [`MediaPlatform`] through the playback [`Engine`](core_playback::Engine).
//!
//! Desktop hosts enable the `desktop-shims` feature (on by default) to get
//! [`software_config`], a configuration backed by the in-process software
//! decoders of `bridge-desktop`.
//!
//! ```ignore
//! use mp4_media_stream::{Mp4MediaStream, PlayOptions};
//!
//! let stream = Mp4MediaStream::load(config, &mp4_bytes, |host| Box::new(MyCore::new(host))).await?;
//! let output = stream.play(PlayOptions { repeat: true })?;
//! // ... render output.audio / output.video ...
//! stream.stop().await?;
//! ```

use core_ffi::{CoreScheduler, HostRef};
use tracing::info;

pub use bridge_traits::MediaPlatform;
pub use core_ffi::{PlayOptions, SessionId};
pub use core_playback::{
    AudioTrack, ContainerInfo, Engine, OutputStream, PlaybackError, Result, VideoTrack,
};
pub use core_runtime::config::{CoreConfig, PlaybackConfig};

/// A loaded container, ready to be played.
pub struct Mp4MediaStream {
    engine: Engine,
    info: ContainerInfo,
}

impl Mp4MediaStream {
    /// Whether `platform` can construct both audio and video decoders.
    ///
    /// Individual codec configurations are checked later, by [`load`](Self::load).
    pub fn is_supported(platform: &dyn MediaPlatform) -> bool {
        platform.supports_decoding()
    }

    /// Construct the core with `make_core`, hand it `container` and check
    /// that every track can be decoded by the configured platform.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, the core rejects the
    /// container, or a track uses a configuration the platform cannot
    /// decode.
    pub async fn load<F>(config: CoreConfig, container: &[u8], make_core: F) -> Result<Self>
    where
        F: FnOnce(HostRef<PlaybackError>) -> Box<dyn CoreScheduler>,
    {
        let engine = Engine::new(config, make_core)?;
        let info = engine.load(container).await?;
        info!(
            audio = info.has_audio(),
            video = info.has_video(),
            "MP4 media stream ready"
        );
        Ok(Self { engine, info })
    }

    pub fn info(&self) -> &ContainerInfo {
        &self.info
    }

    /// Start a new, independent playback of the container.
    ///
    /// Each call returns its own tracks. A single playback is stopped by
    /// dropping or stopping its tracks.
    pub fn play(&self, options: PlayOptions) -> Result<OutputStream> {
        self.engine.play(options)
    }

    /// Stop every playback started from this stream.
    pub async fn stop(&self) -> Result<()> {
        self.engine.stop_all().await
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

impl std::fmt::Debug for Mp4MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mp4MediaStream")
            .field("info", &self.info)
            .field("engine", &self.engine)
            .finish()
    }
}

/// Configuration backed by the `bridge-desktop` software decoders.
#[cfg(feature = "desktop-shims")]
pub fn software_config(playback: PlaybackConfig) -> core_runtime::Result<CoreConfig> {
    use std::rc::Rc;

    CoreConfig::builder()
        .platform(Rc::new(bridge_desktop::SoftwarePlatform::new()))
        .playback(playback)
        .build()
}
