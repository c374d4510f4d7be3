// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use webrtc::media::Sample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::codecs::{opus_capability, video_capability};
use crate::core::error::PeerError;
use crate::core::media::{MediaKind, MediaTrack, TrackInfo};
use crate::core::peer::PeerResult;
use crate::core::profile::VideoCodec;

const STREAM_ID: &str = "onair";

/// Encoded-sample track fed by the capture layer.
///
/// Samples written while the track is disabled or stopped are dropped, so a
/// muted source keeps its m-line without sending media.
pub struct SampleTrack {
    id: String,
    kind: MediaKind,
    info: TrackInfo,
    local: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl SampleTrack {
    pub fn video(codec: VideoCodec, id: impl Into<String>, info: TrackInfo) -> Arc<Self> {
        Self::new(MediaKind::Video, id.into(), info, |id| {
            TrackLocalStaticSample::new(video_capability(codec), id, STREAM_ID.to_owned())
        })
    }

    pub fn audio_opus(id: impl Into<String>, info: TrackInfo) -> Arc<Self> {
        Self::new(MediaKind::Audio, id.into(), info, |id| {
            TrackLocalStaticSample::new(opus_capability(), id, STREAM_ID.to_owned())
        })
    }

    fn new(
        kind: MediaKind,
        id: String,
        info: TrackInfo,
        make: impl FnOnce(String) -> TrackLocalStaticSample,
    ) -> Arc<Self> {
        Arc::new(Self {
            local: Arc::new(make(id.clone())),
            id,
            kind,
            info,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }

    pub(crate) fn local(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.local) as Arc<dyn TrackLocal + Send + Sync>
    }

    /// Returns `false` when the sample was dropped.
    pub async fn write_sample(&self, sample: &Sample) -> PeerResult<bool> {
        if self.stopped.load(Ordering::Acquire) || !self.enabled.load(Ordering::Acquire) {
            return Ok(false);
        }
        self.local
            .write_sample(sample)
            .await
            .map_err(|e| PeerError::new("write_sample", e.to_string()))?;
        Ok(true)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl MediaTrack for SampleTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn info(&self) -> TrackInfo {
        self.info.clone()
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            tracing::debug!("[SampleTrack] Stopped {} track '{}'", self.kind, self.id);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    #[tokio::test]
    async fn test_disabled_track_drops_samples() {
        let track = SampleTrack::audio_opus("mic", TrackInfo::default());
        let sample = Sample {
            data: Bytes::from_static(&[0xf8, 0xff, 0xfe]),
            duration: Duration::from_millis(20),
            ..Default::default()
        };

        track.set_enabled(false);
        assert!(!track.write_sample(&sample).await.unwrap());

        track.set_enabled(true);
        track.stop();
        assert!(track.is_stopped());
        assert!(!track.write_sample(&sample).await.unwrap());
    }

    #[test]
    fn test_kind_and_id() {
        let track = SampleTrack::video(VideoCodec::VP8, "cam", TrackInfo::default());
        assert_eq!(track.kind(), MediaKind::Video);
        assert_eq!(track.id(), "cam");
        assert!(track.is_enabled());
        assert!(track.as_any().downcast_ref::<SampleTrack>().is_some());
    }
}
