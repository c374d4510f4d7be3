// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecParameters, RTPCodecType};

use super::codecs::{opus_codec, video_codecs};
use super::connection::WebRtcPeerConnection;
use crate::core::error::{PeerError, PublishError, Result};
use crate::core::peer::{PeerConnection, PeerConnectionFactory, PeerResult};
use crate::core::profile::{EncodingParameters, VideoCodec};

/// Builds webrtc-rs peer connections sharing one media engine.
pub struct WebRtcPeerFactory {
    api: API,
    video_codecs: Arc<Vec<(VideoCodec, RTCRtpCodecParameters)>>,
    encoding_tx: Arc<watch::Sender<Option<EncodingParameters>>>,
}

impl WebRtcPeerFactory {
    pub fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();

        let video_codecs = video_codecs();
        for (codec, params) in &video_codecs {
            media_engine
                .register_codec(params.clone(), RTPCodecType::Video)
                .map_err(|e| {
                    PublishError::Configuration(format!("Failed to register {} codec: {}", codec, e))
                })?;
        }
        media_engine
            .register_codec(opus_codec(), RTPCodecType::Audio)
            .map_err(|e| {
                PublishError::Configuration(format!("Failed to register Opus codec: {}", e))
            })?;

        tracing::info!(
            "[WebRTC] Registered video codecs {:?} and Opus (PT=111)",
            video_codecs
                .iter()
                .map(|(codec, params)| format!("{}={}", codec, params.payload_type))
                .collect::<Vec<_>>()
        );

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| {
                PublishError::Configuration(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let (encoding_tx, _) = watch::channel(None);
        Ok(Self {
            api,
            video_codecs: Arc::new(video_codecs),
            encoding_tx: Arc::new(encoding_tx),
        })
    }

    /// Encoding layer applied to the current video sender.
    ///
    /// webrtc-rs does not rate-limit senders itself, so the capture layer's
    /// encoder should follow these updates.
    pub fn encoding_updates(&self) -> watch::Receiver<Option<EncodingParameters>> {
        self.encoding_tx.subscribe()
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerFactory {
    async fn create(&self) -> PeerResult<Box<dyn PeerConnection>> {
        let pc = self
            .api
            .new_peer_connection(RTCConfiguration::default())
            .await
            .map_err(|e| PeerError::new("new_peer_connection", e.to_string()))?;

        tracing::debug!("[WebRTC] RTCPeerConnection created");
        Ok(Box::new(WebRtcPeerConnection::new(
            Arc::new(pc),
            Arc::clone(&self.video_codecs),
            Arc::clone(&self.encoding_tx),
        )))
    }
}
