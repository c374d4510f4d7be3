// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecParameters;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::TrackLocal;

use super::codecs::preference_order;
use super::track::SampleTrack;
use crate::core::error::PeerError;
use crate::core::media::{MediaKind, TrackRef};
use crate::core::peer::{IceConnectionState, OfferOptions, PeerConnection, PeerResult};
use crate::core::profile::{EncodingParameters, VideoCodec};

fn map_ice_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    match state {
        RTCIceConnectionState::New => Some(IceConnectionState::New),
        RTCIceConnectionState::Checking => Some(IceConnectionState::Checking),
        RTCIceConnectionState::Connected => Some(IceConnectionState::Connected),
        RTCIceConnectionState::Completed => Some(IceConnectionState::Completed),
        RTCIceConnectionState::Disconnected => Some(IceConnectionState::Disconnected),
        RTCIceConnectionState::Failed => Some(IceConnectionState::Failed),
        RTCIceConnectionState::Closed => Some(IceConnectionState::Closed),
        _ => None,
    }
}

/// The webrtc-rs track behind `track`. Only [`SampleTrack`] can be sent.
fn track_local(
    track: &TrackRef,
    operation: &'static str,
) -> PeerResult<Arc<dyn TrackLocal + Send + Sync>> {
    track
        .as_any()
        .downcast_ref::<SampleTrack>()
        .map(SampleTrack::local)
        .ok_or_else(|| {
            PeerError::new(
                operation,
                format!("track '{}' is not a SampleTrack", track.id()),
            )
        })
}

/// One webrtc-rs `RTCPeerConnection` with send-only transceivers.
pub struct WebRtcPeerConnection {
    pc: Arc<RTCPeerConnection>,
    video_codecs: Arc<Vec<(VideoCodec, RTCRtpCodecParameters)>>,
    encoding_tx: Arc<watch::Sender<Option<EncodingParameters>>>,
    transceivers: Mutex<HashMap<MediaKind, Arc<RTCRtpTransceiver>>>,
    senders: Mutex<HashMap<MediaKind, Arc<RTCRtpSender>>>,
    sender_params: Mutex<HashMap<MediaKind, EncodingParameters>>,
    gathering: Mutex<Option<mpsc::Receiver<()>>>,
    ice_events: Mutex<Option<mpsc::UnboundedReceiver<IceConnectionState>>>,
}

impl WebRtcPeerConnection {
    pub(crate) fn new(
        pc: Arc<RTCPeerConnection>,
        video_codecs: Arc<Vec<(VideoCodec, RTCRtpCodecParameters)>>,
        encoding_tx: Arc<watch::Sender<Option<EncodingParameters>>>,
    ) -> Self {
        let (ice_tx, ice_rx) = mpsc::unbounded_channel();
        pc.on_ice_connection_state_change(Box::new(move |state| {
            let ice_tx = ice_tx.clone();
            Box::pin(async move {
                tracing::info!("[WebRTC] ICE connection state changed: {:?}", state);
                if let Some(state) = map_ice_state(state) {
                    let _ = ice_tx.send(state);
                }
            })
        }));

        pc.on_ice_gathering_state_change(Box::new(move |state| {
            Box::pin(async move {
                tracing::debug!("[WebRTC] ICE gathering state: {:?}", state);
            })
        }));

        pc.on_peer_connection_state_change(Box::new(move |state| {
            Box::pin(async move {
                tracing::info!("[WebRTC] Peer connection state: {:?}", state);
            })
        }));

        Self {
            pc,
            video_codecs,
            encoding_tx,
            transceivers: Mutex::new(HashMap::new()),
            senders: Mutex::new(HashMap::new()),
            sender_params: Mutex::new(HashMap::new()),
            gathering: Mutex::new(None),
            ice_events: Mutex::new(Some(ice_rx)),
        }
    }

    fn sender(&self, kind: MediaKind) -> Option<Arc<RTCRtpSender>> {
        self.senders.lock().get(&kind).cloned()
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeerConnection {
    async fn add_track(&self, track: TrackRef) -> PeerResult<()> {
        let kind = track.kind();
        let local = track_local(&track, "add_track")?;

        let transceiver = self
            .pc
            .add_transceiver_from_track(
                local,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| PeerError::new("add_track", e.to_string()))?;

        let sender = transceiver.sender().await;

        // RTCP must be read for interceptors (NACK, reports) to run.
        let rtcp_sender = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = rtcp_sender.read(&mut rtcp_buf).await {}
            tracing::debug!("[WebRTC] {} RTCP reader stopped", kind);
        });

        self.transceivers.lock().insert(kind, transceiver);
        self.senders.lock().insert(kind, sender);
        tracing::debug!("[WebRTC] Added sendonly {} transceiver for '{}'", kind, track.id());
        Ok(())
    }

    async fn set_video_codec_preference(&self, codec: VideoCodec) -> PeerResult<bool> {
        let Some(transceiver) = self.transceivers.lock().get(&MediaKind::Video).cloned() else {
            return Ok(false);
        };
        let Some(ordered) = preference_order(&self.video_codecs, codec) else {
            return Ok(false);
        };

        transceiver
            .set_codec_preferences(ordered)
            .await
            .map_err(|e| PeerError::new("set_codec_preferences", e.to_string()))?;
        tracing::debug!("[WebRTC] Preferred video codec: {}", codec);
        Ok(true)
    }

    async fn create_offer(&self, options: OfferOptions) -> PeerResult<String> {
        let offer = self
            .pc
            .create_offer(Some(RTCOfferOptions {
                ice_restart: options.ice_restart,
                ..Default::default()
            }))
            .await
            .map_err(|e| PeerError::new("create_offer", e.to_string()))?;
        Ok(offer.sdp)
    }

    async fn set_local_description(&self, sdp: String) -> PeerResult<()> {
        let description = RTCSessionDescription::offer(sdp)
            .map_err(|e| PeerError::new("set_local_description", e.to_string()))?;

        // The promise only observes gathering started after it was created.
        let gathering = self.pc.gathering_complete_promise().await;
        *self.gathering.lock() = Some(gathering);

        self.pc
            .set_local_description(description)
            .await
            .map_err(|e| PeerError::new("set_local_description", e.to_string()))
    }

    async fn gathering_complete(&self) {
        let gathering = self.gathering.lock().take();
        if let Some(mut gathering) = gathering {
            let _ = gathering.recv().await;
        }
    }

    async fn local_description(&self) -> Option<String> {
        self.pc.local_description().await.map(|desc| desc.sdp)
    }

    async fn set_remote_answer(&self, sdp: String) -> PeerResult<()> {
        let answer = RTCSessionDescription::answer(sdp)
            .map_err(|e| PeerError::new("set_remote_description", e.to_string()))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| PeerError::new("set_remote_description", e.to_string()))
    }

    fn has_sender(&self, kind: MediaKind) -> bool {
        self.senders.lock().contains_key(&kind)
    }

    async fn sender_parameters(&self, kind: MediaKind) -> Option<EncodingParameters> {
        self.sender_params.lock().get(&kind).copied()
    }

    async fn set_sender_parameters(
        &self,
        kind: MediaKind,
        params: EncodingParameters,
    ) -> PeerResult<()> {
        if !self.has_sender(kind) {
            return Err(PeerError::new(
                "set_sender_parameters",
                format!("no {} sender", kind),
            ));
        }
        self.sender_params.lock().insert(kind, params);
        if kind == MediaKind::Video {
            self.encoding_tx.send_replace(Some(params));
        }
        Ok(())
    }

    async fn replace_track(&self, kind: MediaKind, track: Option<TrackRef>) -> PeerResult<()> {
        let sender = self.sender(kind).ok_or_else(|| {
            PeerError::new("replace_track", format!("no {} sender", kind))
        })?;
        let local = match &track {
            Some(track) => Some(track_local(track, "replace_track")?),
            None => None,
        };
        sender
            .replace_track(local)
            .await
            .map_err(|e| PeerError::new("replace_track", e.to_string()))
    }

    async fn restart_ice(&self) -> PeerResult<()> {
        // webrtc-rs restarts ICE from the next offer's `ice_restart` option.
        tracing::info!("[WebRTC] ICE restart requested");
        Ok(())
    }

    fn take_ice_events(&self) -> Option<mpsc::UnboundedReceiver<IceConnectionState>> {
        self.ice_events.lock().take()
    }

    async fn close(&self) -> PeerResult<()> {
        self.senders.lock().clear();
        self.transceivers.lock().clear();
        self.pc
            .close()
            .await
            .map_err(|e| PeerError::new("close", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::media::TrackInfo;
    use crate::core::peer::PeerConnectionFactory;
    use crate::core::profile::EncodingProfile;
    use crate::webrtc::WebRtcPeerFactory;

    #[tokio::test]
    async fn test_offer_is_sendonly_with_preferred_codec_first() {
        let factory = WebRtcPeerFactory::new().unwrap();
        let pc = factory.create().await.unwrap();

        let video: TrackRef = SampleTrack::video(VideoCodec::VP8, "cam", TrackInfo::default());
        let audio: TrackRef = SampleTrack::audio_opus("mic", TrackInfo::default());
        pc.add_track(video).await.unwrap();
        pc.add_track(audio).await.unwrap();
        assert!(pc.set_video_codec_preference(VideoCodec::VP8).await.unwrap());

        let offer = pc.create_offer(OfferOptions::default()).await.unwrap();
        assert!(offer.contains("a=sendonly"));
        let video_mline = offer
            .lines()
            .find(|line| line.starts_with("m=video"))
            .unwrap();
        assert_eq!(video_mline.split_whitespace().nth(3), Some("96"));
        assert!(offer.contains("opus/48000/2"));

        pc.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_sender_parameters_are_published() {
        let factory = WebRtcPeerFactory::new().unwrap();
        let mut updates = factory.encoding_updates();
        let pc = factory.create().await.unwrap();

        let params = EncodingParameters::from_profile(&EncodingProfile::default());
        assert!(pc.set_sender_parameters(MediaKind::Video, params).await.is_err());

        let video: TrackRef = SampleTrack::video(VideoCodec::H264, "cam", TrackInfo::default());
        pc.add_track(video).await.unwrap();
        pc.set_sender_parameters(MediaKind::Video, params).await.unwrap();

        assert_eq!(pc.sender_parameters(MediaKind::Video).await, Some(params));
        assert!(updates.has_changed().unwrap());
        assert_eq!(*updates.borrow_and_update(), Some(params));

        pc.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_foreign_track_is_rejected() {
        struct Foreign;
        impl crate::core::media::MediaTrack for Foreign {
            fn id(&self) -> &str {
                "foreign"
            }
            fn kind(&self) -> MediaKind {
                MediaKind::Audio
            }
            fn info(&self) -> TrackInfo {
                TrackInfo::default()
            }
            fn is_enabled(&self) -> bool {
                true
            }
            fn set_enabled(&self, _enabled: bool) {}
            fn stop(&self) {}
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }

        let factory = WebRtcPeerFactory::new().unwrap();
        let pc = factory.create().await.unwrap();
        let err = pc.add_track(Arc::new(Foreign)).await.unwrap_err();
        assert_eq!(err.operation, "add_track");
        assert!(pc.take_ice_events().is_some());
        assert!(pc.take_ice_events().is_none());
        pc.close().await.unwrap();
    }
}
