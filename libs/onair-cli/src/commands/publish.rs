// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use onair::webrtc::{SampleTrack, WebRtcPeerFactory};
use onair::{
    ControlBus, MediaTrack, OnAirConfig, Publisher, RoomBus, SessionTracks, StatusEvent,
    TeardownRequest, TrackInfo, TrackRef, VideoCodec, init_logging, topics,
};
use tokio::sync::watch;
use webrtc::media::Sample;
use webrtc::media::io::h264_reader::H264Reader;

use crate::PublishArgs;

/// One 20 ms Opus frame of silence.
const OPUS_SILENCE: [u8; 3] = [0xf8, 0xff, 0xfe];
const OPUS_FRAME: Duration = Duration::from_millis(20);
const H264_READ_CAPACITY: usize = 1_048_576;

/// Flags win over `onair.yaml`.
pub(crate) fn apply_overrides(config: &mut OnAirConfig, args: &PublishArgs) {
    if let Some(endpoint) = &args.endpoint {
        config.whip.endpoint_url = endpoint.clone();
    }
    if let Some(token) = &args.token {
        config.whip.auth_token = Some(token.clone());
    }
    if let Some(room) = &args.room {
        config.stream.room = room.clone();
    }
    if let Some(stream_id) = &args.stream_id {
        config.stream.stream_id = stream_id.clone();
    }
    if let Some(bitrate) = args.bitrate {
        config.encoding.max_bitrate_kbps = bitrate;
    }
    if let Some(fps) = args.fps {
        config.encoding.max_framerate = fps;
    }
    if let Some(codec) = args.codec {
        config.encoding.video_codec = codec;
    }
    if args.studio_sound {
        config.encoding.studio_sound = true;
    }
}

pub async fn run(args: PublishArgs, log: Option<String>) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => OnAirConfig::load(path)?,
        None => OnAirConfig::load_or_default(&std::env::current_dir()?),
    };
    apply_overrides(&mut config, &args);
    if let Some(filter) = log {
        config.logging.filter = filter;
    }
    init_logging(&config.logging);
    config.validate().context("Invalid publisher configuration")?;

    let factory = Arc::new(WebRtcPeerFactory::new()?);
    let bus = Arc::new(RoomBus::new());
    spawn_status_logger(&bus, &config.stream.room);
    spawn_encoding_logger(&factory);

    let audio = SampleTrack::audio_opus(
        "onair-audio",
        TrackInfo {
            label: "Synthetic silence".into(),
            device_id: "synthetic-audio".into(),
            ..Default::default()
        },
    );
    tokio::spawn(pump_silence(Arc::clone(&audio)));

    let video = if args.audio_only {
        None
    } else {
        let video = synthetic_video(config.encoding.video_codec, &args);
        if let Some(path) = &args.video_file {
            let data = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            tokio::spawn(pump_h264(
                Arc::clone(&video),
                Arc::new(data),
                config.encoding.max_framerate,
            ));
        }
        Some(video)
    };

    let tracks = SessionTracks::new(
        video.map(|v| v as TrackRef),
        Some(Arc::clone(&audio) as TrackRef),
    )?;

    let handle = Publisher::from_config(&config)?
        .peer_factory(factory)
        .bus(bus)
        .spawn()?;

    println!(
        "Publishing {} to {}",
        handle.identity(),
        config.whip.endpoint_url
    );

    if let Err(e) = handle.start_stream(Some(tracks.clone())).await {
        handle.shutdown().await?;
        stop_all(&tracks);
        return Err(e).context("Failed to start publishing");
    }

    println!("Live. Press Ctrl+C to stop");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            tracing::info!("[onair] Ctrl+C received, stopping");
            handle.stop_stream().await?;
        }
        request = wait_for_teardown(handle.teardown_requested()) => {
            if let Some(request) = request {
                println!(
                    "Session ended{}",
                    request.reason.map(|r| format!(": {}", r)).unwrap_or_default()
                );
            }
        }
    }

    handle.shutdown().await?;
    stop_all(&tracks);
    Ok(())
}

fn synthetic_video(codec: VideoCodec, args: &PublishArgs) -> Arc<SampleTrack> {
    let label = match &args.video_file {
        Some(path) => path.display().to_string(),
        None => "Synthetic camera".to_string(),
    };
    if codec != VideoCodec::H264 && args.video_file.is_some() {
        tracing::warn!(
            "[onair] --video-file is H.264 but the preferred codec is {}",
            codec
        );
    }
    SampleTrack::video(
        codec,
        "onair-video",
        TrackInfo {
            label,
            device_id: "synthetic-video".into(),
            ..Default::default()
        },
    )
}

fn stop_all(tracks: &SessionTracks) {
    for track in tracks.iter() {
        track.stop();
    }
}

async fn wait_for_teardown(
    mut rx: watch::Receiver<Option<TeardownRequest>>,
) -> Option<TeardownRequest> {
    match rx.wait_for(Option::is_some).await {
        Ok(request) => request.clone(),
        Err(_) => std::future::pending().await,
    }
}

fn spawn_status_logger(bus: &RoomBus, room: &str) {
    let mut rx = bus.subscribe(&topics::status(room));
    tokio::spawn(async move {
        while let Ok(payload) = rx.recv().await {
            match serde_json::from_str::<StatusEvent>(&payload) {
                Ok(event) => tracing::info!(
                    "[onair] status {:?}{}",
                    event.status,
                    event.message.map(|m| format!(" ({})", m)).unwrap_or_default()
                ),
                // Device events share the topic
                Err(_) => tracing::debug!("[onair] {}", payload),
            }
        }
    });
}

fn spawn_encoding_logger(factory: &WebRtcPeerFactory) {
    let mut updates = factory.encoding_updates();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let params = *updates.borrow_and_update();
            if let Some(params) = params {
                tracing::info!(
                    "[onair] Encoder target {} bps @ {} fps",
                    params.max_bitrate_bps,
                    params.max_framerate
                );
            }
        }
    });
}

async fn pump_silence(track: Arc<SampleTrack>) {
    let mut ticker = tokio::time::interval(OPUS_FRAME);
    let sample = Sample {
        data: Bytes::from_static(&OPUS_SILENCE),
        duration: OPUS_FRAME,
        ..Default::default()
    };
    while !track.is_stopped() {
        ticker.tick().await;
        if let Err(e) = track.write_sample(&sample).await {
            tracing::debug!("[onair] Audio sample dropped: {}", e);
        }
    }
}

/// Loop an Annex-B file, one NAL unit per frame interval.
async fn pump_h264(track: Arc<SampleTrack>, data: Arc<Vec<u8>>, fps: u32) {
    let frame = Duration::from_secs(1) / fps.max(1);
    let mut ticker = tokio::time::interval(frame);

    while !track.is_stopped() {
        let mut reader = H264Reader::new(Cursor::new(data.as_slice()), H264_READ_CAPACITY);
        let mut written = 0usize;
        while let Ok(nal) = reader.next_nal() {
            ticker.tick().await;
            if track.is_stopped() {
                return;
            }
            let sample = Sample {
                data: nal.data.freeze(),
                duration: frame,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                tracing::debug!("[onair] Video sample dropped: {}", e);
            }
            written += 1;
        }
        if written == 0 {
            tracing::warn!("[onair] No H.264 NAL units in video file, video stays black");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let mut config = OnAirConfig::default();
        config.stream.room = "fromfile".into();
        config.encoding.max_bitrate_kbps = 1000;

        let args = PublishArgs {
            room: Some("roomA".into()),
            stream_id: Some("alice".into()),
            endpoint: Some("https://ingest.example/roomA/alice/whip".into()),
            bitrate: Some(3000),
            codec: Some(VideoCodec::AV1),
            ..Default::default()
        };
        apply_overrides(&mut config, &args);

        assert_eq!(config.stream.room, "roomA");
        assert_eq!(config.stream.stream_id, "alice");
        assert_eq!(config.whip.endpoint_url, "https://ingest.example/roomA/alice/whip");
        assert_eq!(config.encoding.max_bitrate_kbps, 3000);
        assert_eq!(config.encoding.max_framerate, 30);
        assert_eq!(config.encoding.video_codec, VideoCodec::AV1);
        assert!(!config.encoding.studio_sound);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_flags_keep_config() {
        let mut config = OnAirConfig::default();
        config.whip.auth_token = Some("from-file".into());
        apply_overrides(&mut config, &PublishArgs::default());
        assert_eq!(config.whip.auth_token.as_deref(), Some("from-file"));
        assert_eq!(config, {
            let mut expected = OnAirConfig::default();
            expected.whip.auth_token = Some("from-file".into());
            expected
        });
    }
}
