//! Engine tests driven by a scripted core
//!
//! The scripted core plays the scheduler's part: each test issues the
//! commands a real core would, in the order the scenario needs, against an
//! engine backed by the software platform.

use bridge_desktop::SoftwarePlatform;
use bridge_traits::{
    AudioDecoderConfig, BridgeError, ChunkMetadata, Clock, VideoDecoderConfig,
};
use core_ffi::{
    CommandHandler, CoreCall, CoreFailure, CoreScheduler, DecoderKind, FfiError, HostRef, PlayOptions,
    ScriptedCore, SessionId,
};
use core_playback::{Engine, PlaybackError};
use core_runtime::config::{CoreConfig, CoreConfigBuilder, PlaybackConfig};
use core_runtime::events::{PlaybackEvent, Receiver};
use serde_json::{json, Value};
use std::rc::Rc;
use std::time::Duration;

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    engine: Engine,
    core: ScriptedCore<PlaybackError>,
    host: HostRef<PlaybackError>,
    platform: Rc<SoftwarePlatform>,
}

struct FixedClock(f64);

impl Clock for FixedClock {
    fn now_millis(&self) -> f64 {
        self.0
    }
}

fn audio_config() -> AudioDecoderConfig {
    AudioDecoderConfig::new("pcm-f32", 8_000, 1)
}

fn video_config() -> VideoDecoderConfig {
    VideoDecoderConfig::new("vp8", 4, 2)
}

fn av_container() -> Value {
    json!({ "audioConfigs": [audio_config()], "videoConfigs": [video_config()] })
}

fn pcm(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn harness_with(
    platform: SoftwarePlatform,
    load_result: Result<Value, CoreFailure>,
    customize: impl FnOnce(CoreConfigBuilder) -> CoreConfigBuilder,
) -> Harness {
    let platform = Rc::new(platform);
    let config = customize(CoreConfig::builder().platform(platform.clone()))
        .build()
        .unwrap();

    let mut parts = None;
    let engine = Engine::new(config, |host| {
        let core = ScriptedCore::new(host.clone(), load_result);
        parts = Some((core.clone(), host));
        Box::new(core) as Box<dyn CoreScheduler>
    })
    .unwrap();

    let (core, host) = parts.unwrap();
    Harness {
        engine,
        core,
        host,
        platform,
    }
}

fn harness(platform: SoftwarePlatform, container: Value) -> Harness {
    harness_with(platform, Ok(container), |builder| builder)
}

async fn loaded() -> Harness {
    let h = harness(SoftwarePlatform::new(), av_container());
    h.engine.load(b"\0\0\0\x18ftypisom").await.unwrap();
    h
}

/// Create both decoders for `session` and wait for the engine to answer.
async fn create_decoders(h: &Harness, session: SessionId) {
    let audio = h.core.create_audio_decoder(session, &audio_config()).unwrap();
    let video = h.core.create_video_decoder(session, &video_config()).unwrap();
    h.engine.settle().await.unwrap();

    let answered = h.core.decoder_kinds();
    assert!(answered.contains(&(audio, DecoderKind::Audio)));
    assert!(answered.contains(&(video, DecoderKind::Video)));
}

fn drain(events: &mut Receiver<PlaybackEvent>) -> Vec<PlaybackEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

// ============================================================================
// Load and play
// ============================================================================

#[core_async::test]
async fn test_load_reports_tracks_and_frees_every_region() {
    let h = harness(SoftwarePlatform::new(), av_container());
    let mut events = h.engine.subscribe();

    let info = h.engine.load(b"mp4 bytes").await.unwrap();
    assert!(info.has_audio() && info.has_video());
    assert!(h.engine.is_loaded());
    assert_eq!(h.core.calls(), vec![CoreCall::Load { length: 9 }]);
    assert_eq!(h.core.shared_memory().live_regions(), 0);
    assert_eq!(
        drain(&mut events),
        vec![PlaybackEvent::Loaded {
            has_audio: true,
            has_video: true
        }]
    );
}

#[core_async::test]
async fn test_capability_gating_blocks_playback() {
    let platform = SoftwarePlatform::new().with_video_codecs(["avc1"]);
    let h = harness(platform, av_container());

    let err = h.engine.load(b"mp4").await.unwrap_err();
    assert!(err.is_capability_error());
    assert!(matches!(
        err,
        PlaybackError::UnsupportedConfiguration {
            kind: DecoderKind::Video,
            ..
        }
    ));

    assert!(h.platform.created_decoders().is_empty());
    assert!(matches!(
        h.engine.play(PlayOptions::default()),
        Err(PlaybackError::NotLoaded)
    ));
    assert!(h.core.played_sessions().is_empty());
}

#[core_async::test]
async fn test_core_load_failure_is_raised() {
    let h = harness_with(
        SoftwarePlatform::new(),
        Err(CoreFailure::new("not an mp4 file")),
        |builder| builder,
    );

    let err = h.engine.load(b"garbage").await.unwrap_err();
    assert!(!err.is_protocol_violation());
    assert!(err.to_string().contains("not an mp4 file"));
    assert!(matches!(err, PlaybackError::Boundary(FfiError::Core(_))));
    assert_eq!(h.core.shared_memory().live_regions(), 0);
}

#[core_async::test]
async fn test_load_twice_is_rejected() {
    let h = loaded().await;
    assert!(matches!(
        h.engine.load(b"again").await,
        Err(PlaybackError::AlreadyLoaded)
    ));
}

#[core_async::test]
async fn test_play_assigns_fresh_sessions() {
    let h = loaded().await;

    let first = h.engine.play(PlayOptions::default()).unwrap();
    let second = h.engine.play(PlayOptions { repeat: true }).unwrap();

    assert_ne!(first.session, second.session);
    assert!(first.has_audio() && first.has_video());
    assert_eq!(h.engine.session_ids(), vec![first.session, second.session]);
    let calls = h.core.calls();
    assert_eq!(
        &calls[1..],
        &[
            CoreCall::Play {
                session: first.session,
                options: PlayOptions { repeat: false }
            },
            CoreCall::Play {
                session: second.session,
                options: PlayOptions { repeat: true }
            },
        ]
    );
}

#[core_async::test]
async fn test_audio_track_uses_container_format_and_queue_bound() {
    let h = harness_with(SoftwarePlatform::new(), Ok(av_container()), |builder| {
        builder.playback(PlaybackConfig::default().with_max_queued_audio_chunks(4))
    });
    h.engine.load(b"mp4").await.unwrap();

    let stream = h.engine.play(PlayOptions::default()).unwrap();
    let audio = stream.audio.as_ref().unwrap();
    assert_eq!(audio.channels(), 1);
    assert_eq!(audio.sample_rate(), 8_000);
    assert_eq!(audio.buffer().max_chunks(), Some(4));
}

#[core_async::test]
async fn test_video_only_container_has_no_audio_track() {
    let h = harness(
        SoftwarePlatform::new(),
        json!({ "videoConfigs": [video_config()] }),
    );
    h.engine.load(b"mp4").await.unwrap();

    let stream = h.engine.play(PlayOptions::default()).unwrap();
    assert!(!stream.has_audio());
    assert!(stream.has_video());
}

// ============================================================================
// Stop
// ============================================================================

#[core_async::test]
async fn test_stop_is_idempotent() {
    let h = loaded().await;
    let stream = h.engine.play(PlayOptions::default()).unwrap();
    let mut events = h.engine.subscribe();

    h.engine.stop(stream.session).await.unwrap();
    h.engine.stop(stream.session).await.unwrap();
    h.engine.stop(4242).await.unwrap();

    assert!(!h.engine.is_live(stream.session));
    assert_eq!(h.core.stopped_sessions(), vec![stream.session]);
    assert_eq!(
        drain(&mut events),
        vec![PlaybackEvent::SessionStopped {
            session: stream.session
        }]
    );
}

#[core_async::test]
async fn test_commands_after_stop_are_ignored() {
    let h = loaded().await;
    let stream = h.engine.play(PlayOptions::default()).unwrap();
    let session = stream.session;
    create_decoders(&h, session).await;
    h.engine.stop(session).await.unwrap();

    let created = h.platform.created_decoders().len();
    h.core
        .decode(session, DecoderKind::Audio, &ChunkMetadata::key(0, 20), &pcm(&[0.5]))
        .unwrap();
    h.core
        .create_audio_decoder(session, &audio_config())
        .unwrap();
    h.core.close_decoder(session, DecoderKind::Video).unwrap();
    h.core.end_of_stream(session).unwrap();
    h.engine.settle().await.unwrap();

    assert_eq!(h.platform.created_decoders().len(), created);
    assert!(h.engine.take_failures().is_empty());
    assert_eq!(h.engine.outstanding_tokens(), 0);
    assert_eq!(h.core.stopped_sessions(), vec![session]);
    assert_eq!(h.core.shared_memory().live_regions(), 0);
}

#[core_async::test]
async fn test_stop_all_stops_every_session() {
    let h = loaded().await;
    let first = h.engine.play(PlayOptions::default()).unwrap();
    let second = h.engine.play(PlayOptions::default()).unwrap();
    create_decoders(&h, first.session).await;

    h.engine.stop_all().await.unwrap();

    assert!(h.engine.session_ids().is_empty());
    assert_eq!(
        h.core.stopped_sessions(),
        vec![first.session, second.session]
    );
    assert!(h
        .platform
        .created_decoders()
        .iter()
        .all(|decoder| decoder.close_count() == 1));
}

// ============================================================================
// End to end
// ============================================================================

#[core_async::test]
async fn test_end_to_end_playback() {
    let h = loaded().await;
    let mut events = h.engine.subscribe();
    let mut stream = h.engine.play(PlayOptions { repeat: false }).unwrap();
    let id = stream.session;

    create_decoders(&h, id).await;

    for i in 0..3u8 {
        let metadata = if i == 0 {
            ChunkMetadata::key(0, 33)
        } else {
            ChunkMetadata::delta(u32::from(i) * 33, 33)
        };
        h.core
            .decode(id, DecoderKind::Video, &metadata, &[i; 8])
            .unwrap();
    }
    h.core
        .decode(id, DecoderKind::Audio, &ChunkMetadata::key(0, 20), &pcm(&[0.1, 0.2]))
        .unwrap();
    h.core
        .decode(id, DecoderKind::Audio, &ChunkMetadata::key(20, 20), &pcm(&[0.3]))
        .unwrap();
    h.engine.settle().await.unwrap();

    // Bytes were copied out before the core scribbled over its buffer.
    let video = stream.video.as_mut().unwrap();
    for i in 0..3u8 {
        let frame = video.recv().await.unwrap();
        assert_eq!(frame.timestamp, Duration::from_millis(u64::from(i) * 33));
        assert_eq!(&frame.data[..], &[i; 8]);
    }

    let audio = stream.audio.as_ref().unwrap();
    let mut rendered = [1.0f32; 4];
    audio.render_interleaved(&mut rendered);
    assert_eq!(rendered, [0.1, 0.2, 0.3, 0.0]);

    h.core.end_of_stream(id).unwrap();
    h.engine.settle().await.unwrap();

    assert!(!h.engine.is_live(id));
    assert_eq!(h.core.stopped_sessions(), vec![id]);
    for decoder in h.platform.created_decoders() {
        assert_eq!(decoder.close_count(), 1);
        assert_eq!(decoder.flush_count(), 1);
    }
    assert_eq!(h.platform.video_decoders()[0].decoded_chunks(), 3);
    assert_eq!(h.platform.audio_decoders()[0].decoded_chunks(), 2);

    assert!(audio.is_ended());
    assert!(video.recv().await.is_none());

    let events = drain(&mut events);
    let stopped = events
        .iter()
        .filter(|e| matches!(e, PlaybackEvent::SessionStopped { .. }))
        .count();
    assert_eq!(stopped, 1);
    assert!(events.contains(&PlaybackEvent::EndOfStream { session: id }));
    assert!(events.contains(&PlaybackEvent::DecoderClosed {
        session: id,
        kind: DecoderKind::Audio
    }));
    assert!(events.contains(&PlaybackEvent::DecoderClosed {
        session: id,
        kind: DecoderKind::Video
    }));

    assert!(h.engine.take_failures().is_empty());
    assert_eq!(h.core.shared_memory().live_regions(), 0);
}

#[core_async::test]
async fn test_end_of_stream_removes_the_session_before_returning() {
    let h = loaded().await;
    let stream = h.engine.play(PlayOptions::default()).unwrap();
    let id = stream.session;
    create_decoders(&h, id).await;

    h.core.end_of_stream(id).unwrap();
    assert!(!h.engine.is_live(id));
    assert_eq!(h.core.stopped_sessions(), vec![id]);

    h.core
        .decode(id, DecoderKind::Video, &ChunkMetadata::key(0, 33), &[1, 2])
        .unwrap();
    h.engine.settle().await.unwrap();

    assert_eq!(h.platform.video_decoders()[0].decoded_chunks(), 0);
    for decoder in h.platform.created_decoders() {
        assert_eq!(decoder.close_count(), 1);
    }
    assert!(h.engine.take_failures().is_empty());
}

// ============================================================================
// Decoder lifecycle
// ============================================================================

#[core_async::test]
async fn test_recreating_a_decoder_closes_the_previous_one() {
    let h = loaded().await;
    let stream = h.engine.play(PlayOptions::default()).unwrap();
    create_decoders(&h, stream.session).await;

    h.core
        .create_audio_decoder(stream.session, &audio_config())
        .unwrap();
    h.engine.settle().await.unwrap();

    let audio = h.platform.audio_decoders();
    assert_eq!(audio.len(), 2);
    assert_eq!(audio[0].close_count(), 1);
    assert_eq!(audio[1].close_count(), 0);
}

#[core_async::test]
async fn test_stop_while_previous_decoder_drains_abandons_the_create() {
    let h = loaded().await;
    let stream = h.engine.play(PlayOptions::default()).unwrap();
    let id = stream.session;
    create_decoders(&h, id).await;
    let first = h.platform.audio_decoders()[0].clone();

    // Local tasks run in spawn order: the create command suspends in the
    // first decoder's flush, then the core ends the session.
    let token = h.core.create_audio_decoder(id, &audio_config()).unwrap();
    let core = h.core.clone();
    let ended = core_async::spawn_local(async move { core.end_of_stream(id) });
    ended.await.unwrap().unwrap();
    h.engine.settle().await.unwrap();

    assert!(first.flush_count() >= 1);
    assert_eq!(first.close_count(), 1);
    assert_eq!(h.platform.audio_decoders().len(), 1);
    assert!(h.core.decoder_kinds().iter().all(|&(answered, _)| answered != token));
    assert!(h.engine.take_failures().is_empty());
    assert_eq!(h.engine.outstanding_tokens(), 0);
    assert_eq!(h.core.stopped_sessions(), vec![id]);
}

#[core_async::test]
async fn test_close_racing_stop_closes_once() {
    let h = loaded().await;
    let stream = h.engine.play(PlayOptions::default()).unwrap();
    create_decoders(&h, stream.session).await;

    h.core
        .close_decoder(stream.session, DecoderKind::Audio)
        .unwrap();
    core_async::yield_now().await;
    h.engine.stop(stream.session).await.unwrap();
    h.engine.settle().await.unwrap();

    for decoder in h.platform.created_decoders() {
        assert_eq!(decoder.close_count(), 1);
    }
    assert!(h.engine.take_failures().is_empty());
}

#[core_async::test]
async fn test_decoder_error_stops_the_session_and_is_reported_once() {
    let h = loaded().await;
    let mut events = h.engine.subscribe();
    let stream = h.engine.play(PlayOptions::default()).unwrap();
    let id = stream.session;
    create_decoders(&h, id).await;

    h.platform.video_decoders()[0].inject_error(BridgeError::DecodeFailed("corrupt".into()));
    h.core
        .decode(id, DecoderKind::Video, &ChunkMetadata::key(0, 33), &[1, 2, 3])
        .unwrap();

    let err = h.engine.settle().await.unwrap_err();
    assert!(matches!(
        err,
        PlaybackError::Decoder(BridgeError::DecodeFailed(_))
    ));
    assert!(!h.engine.is_live(id));
    assert_eq!(h.core.stopped_sessions(), vec![id]);
    assert!(h.engine.take_failures().is_empty());

    let failed = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, PlaybackEvent::SessionFailed { .. }))
        .count();
    assert_eq!(failed, 1);
}

#[core_async::test]
async fn test_decoder_error_removes_the_session_before_returning() {
    let h = loaded().await;
    let stream = h.engine.play(PlayOptions::default()).unwrap();
    let id = stream.session;
    create_decoders(&h, id).await;

    let video = h.platform.video_decoders()[0].clone();
    video.inject_error(BridgeError::DecodeFailed("corrupt".into()));
    h.core
        .decode(id, DecoderKind::Video, &ChunkMetadata::key(0, 33), &[1])
        .unwrap();

    assert!(!h.engine.is_live(id));
    assert_eq!(h.core.stopped_sessions(), vec![id]);

    // The next chunk of the same batch never reaches the failed decoder.
    h.core
        .decode(id, DecoderKind::Video, &ChunkMetadata::delta(33, 33), &[2])
        .unwrap();
    assert!(matches!(
        h.engine.settle().await,
        Err(PlaybackError::Decoder(BridgeError::DecodeFailed(_)))
    ));
    assert_eq!(video.decoded_chunks(), 0);
    assert_eq!(video.close_count(), 1);
}

#[core_async::test]
async fn test_consumer_going_away_ends_the_session_quietly() {
    let h = loaded().await;
    let mut stream = h.engine.play(PlayOptions::default()).unwrap();
    let id = stream.session;
    create_decoders(&h, id).await;

    drop(stream.audio.take());
    h.core
        .decode(id, DecoderKind::Audio, &ChunkMetadata::key(0, 20), &pcm(&[0.1]))
        .unwrap();
    h.engine.settle().await.unwrap();

    assert!(!h.engine.is_live(id));
    assert!(h.engine.take_failures().is_empty());
}

// ============================================================================
// Protocol
// ============================================================================

#[core_async::test]
async fn test_sleep_awakes_the_core() {
    let h = loaded().await;

    let token = h.core.sleep(5).unwrap();
    assert_eq!(h.engine.outstanding_tokens(), 1);
    h.engine.settle().await.unwrap();

    assert_eq!(h.core.awakened(), vec![token]);
    assert_eq!(h.engine.outstanding_tokens(), 0);
}

#[core_async::test]
async fn test_outstanding_token_reuse_is_a_protocol_violation() {
    let h = loaded().await;
    let stream = h.engine.play(PlayOptions::default()).unwrap();

    let token = h.core.sleep(5).unwrap();
    let err = h
        .core
        .create_decoder(DecoderKind::Audio, token, stream.session, &audio_config())
        .unwrap_err();
    assert!(err.is_protocol_violation());
    assert!(matches!(err, PlaybackError::TokenReused(t) if t == token));

    // Once answered, the token may be used again.
    h.engine.settle().await.unwrap();
    h.core
        .create_decoder(DecoderKind::Audio, token, stream.session, &audio_config())
        .unwrap();
    h.engine.settle().await.unwrap();
    assert_eq!(h.core.decoder_kinds(), vec![(token, DecoderKind::Audio)]);
    assert_eq!(h.core.shared_memory().live_regions(), 0);
}

#[core_async::test]
async fn test_chunk_for_missing_decoder_is_a_protocol_violation() {
    let h = loaded().await;
    let stream = h.engine.play(PlayOptions::default()).unwrap();

    let err = h
        .core
        .decode(
            stream.session,
            DecoderKind::Video,
            &ChunkMetadata::key(0, 33),
            &[0; 4],
        )
        .unwrap_err();
    assert!(err.is_protocol_violation());
    assert!(matches!(
        err,
        PlaybackError::MissingDecoder {
            kind: DecoderKind::Video,
            ..
        }
    ));
}

#[core_async::test]
async fn test_out_of_range_chunk_is_a_protocol_violation() {
    let h = loaded().await;
    let stream = h.engine.play(PlayOptions::default()).unwrap();
    create_decoders(&h, stream.session).await;

    let memory = h.core.shared_memory();
    let metadata = memory.encode(&ChunkMetadata::key(0, 20)).unwrap();
    let host = h.host.get().unwrap();
    let err = host
        .decode(
            stream.session,
            DecoderKind::Audio,
            metadata,
            memory.size() + 16,
            4,
        )
        .unwrap_err();

    assert!(err.is_protocol_violation());
    assert!(matches!(
        err,
        PlaybackError::Boundary(FfiError::OutOfBounds { .. })
    ));
}

#[core_async::test]
async fn test_core_queries_are_served_by_the_host() {
    let h = harness_with(SoftwarePlatform::new(), Ok(av_container()), |builder| {
        builder.clock(Rc::new(FixedClock(1234.5)))
    });

    assert_eq!(h.core.now().unwrap(), 1234.5);
    h.core.log("demuxed moov box").unwrap();
    h.core.log(&json!({ "track": 1 })).unwrap();
    assert_eq!(h.core.shared_memory().live_regions(), 0);
}

#[core_async::test]
async fn test_dropped_engine_is_unavailable_to_the_core() {
    let h = loaded().await;
    let core = h.core.clone();
    drop(h);

    assert!(matches!(
        core.sleep(1),
        Err(PlaybackError::Boundary(FfiError::HostUnavailable))
    ));
}
