// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared fixtures: a scriptable peer connection, fake capture tracks and a
//! WHIP endpoint on wiremock.

#![allow(dead_code)]

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use onair::core::peer::PeerResult;
use onair::{
    ControlBus, ControlMessage, EncodingParameters, IceConnectionState, MediaKind, MediaTrack,
    OfferOptions, PeerConnection, PeerConnectionFactory, PeerError, PublishEndpoint, Publisher,
    PublisherBuilder, PublisherHandle, RoomBus, SessionSettings, SessionState, SessionTracks,
    StatusEvent, StreamIdentity, StreamStatus, TrackInfo, TrackRef, VideoCodec, topics,
};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ROOM: &str = "roomA";
pub const STREAM_ID: &str = "alice";
pub const WHIP_PATH: &str = "/whip/roomA/alice/whip";
pub const RESOURCE_PATH: &str = "/whip/roomA/alice/resource/1";

/// What a browser-like stack offers before munging.
pub const MOCK_OFFER: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 102\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=sendrecv\r\n\
a=rtcp-mux\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtcp-fb:96 nack\r\n\
a=rtpmap:102 H264/90000\r\n\
a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f\r\n\
a=rtcp-fb:102 nack\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:1\r\n\
a=sendrecv\r\n\
a=rtcp-mux\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10;useinbandfec=1\r\n";

pub const MOCK_ANSWER: &str = "v=0\r\n\
o=- 1 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 102\r\n\
a=mid:0\r\n\
a=recvonly\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
a=mid:1\r\n\
a=recvonly\r\n";

// ============================================================================
// Tracks
// ============================================================================

pub struct FakeTrack {
    id: String,
    kind: MediaKind,
    label: String,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl FakeTrack {
    pub fn video(id: &str) -> TrackRef {
        Self::new(id, MediaKind::Video)
    }

    pub fn audio(id: &str) -> TrackRef {
        Self::new(id, MediaKind::Audio)
    }

    fn new(id: &str, kind: MediaKind) -> TrackRef {
        Arc::new(Self {
            id: id.to_string(),
            kind,
            label: format!("{} device", id),
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn info(&self) -> TrackInfo {
        TrackInfo {
            label: self.label.clone(),
            device_id: format!("dev-{}", self.id),
            ..Default::default()
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn camera_and_mic() -> SessionTracks {
    SessionTracks::new(Some(FakeTrack::video("cam-1")), Some(FakeTrack::audio("mic-1"))).unwrap()
}

// ============================================================================
// Peer connection
// ============================================================================

/// Everything a test can observe or poke on one mock connection.
pub struct PeerRecorder {
    pub offers: Mutex<Vec<OfferOptions>>,
    pub local_description: Mutex<Option<String>>,
    pub remote_answer: Mutex<Option<String>>,
    /// Current track id per sender kind.
    pub senders: Mutex<HashMap<MediaKind, Option<String>>>,
    pub video_params: Mutex<Option<EncodingParameters>>,
    pub param_sets: AtomicUsize,
    pub codec_preference: Mutex<Option<VideoCodec>>,
    pub ice_restarts: AtomicUsize,
    pub closed: AtomicBool,
    /// Make every `set_sender_parameters` call fail.
    pub fail_params: AtomicBool,
    ice_tx: mpsc::UnboundedSender<IceConnectionState>,
}

impl PeerRecorder {
    pub fn emit_ice(&self, state: IceConnectionState) {
        let _ = self.ice_tx.send(state);
    }

    pub fn current_params(&self) -> Option<EncodingParameters> {
        *self.video_params.lock()
    }

    /// Simulate the stack (or bandwidth estimation) moving the sender.
    pub fn drift_bitrate(&self, max_bitrate_bps: u64) {
        if let Some(params) = self.video_params.lock().as_mut() {
            params.max_bitrate_bps = max_bitrate_bps;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockPeer {
    recorder: Arc<PeerRecorder>,
    ice_rx: Mutex<Option<mpsc::UnboundedReceiver<IceConnectionState>>>,
    supported_codecs: Vec<VideoCodec>,
    stall_gathering: bool,
}

#[async_trait]
impl PeerConnection for MockPeer {
    async fn add_track(&self, track: TrackRef) -> PeerResult<()> {
        self.recorder
            .senders
            .lock()
            .insert(track.kind(), Some(track.id().to_string()));
        Ok(())
    }

    async fn set_video_codec_preference(&self, codec: VideoCodec) -> PeerResult<bool> {
        if !self.supported_codecs.contains(&codec) {
            return Ok(false);
        }
        *self.recorder.codec_preference.lock() = Some(codec);
        Ok(true)
    }

    async fn create_offer(&self, options: OfferOptions) -> PeerResult<String> {
        self.recorder.offers.lock().push(options);
        Ok(MOCK_OFFER.to_string())
    }

    async fn set_local_description(&self, sdp: String) -> PeerResult<()> {
        *self.recorder.local_description.lock() = Some(sdp);
        Ok(())
    }

    async fn gathering_complete(&self) {
        if self.stall_gathering {
            std::future::pending::<()>().await;
        }
    }

    async fn local_description(&self) -> Option<String> {
        self.recorder.local_description.lock().clone()
    }

    async fn set_remote_answer(&self, sdp: String) -> PeerResult<()> {
        *self.recorder.remote_answer.lock() = Some(sdp);
        Ok(())
    }

    fn has_sender(&self, kind: MediaKind) -> bool {
        self.recorder.senders.lock().contains_key(&kind)
    }

    async fn sender_parameters(&self, kind: MediaKind) -> Option<EncodingParameters> {
        match kind {
            MediaKind::Video => self.recorder.current_params(),
            MediaKind::Audio => None,
        }
    }

    async fn set_sender_parameters(
        &self,
        kind: MediaKind,
        params: EncodingParameters,
    ) -> PeerResult<()> {
        if !self.has_sender(kind) {
            return Err(PeerError::new("set_sender_parameters", "no sender"));
        }
        if self.recorder.fail_params.load(Ordering::SeqCst) {
            return Err(PeerError::new("set_sender_parameters", "rejected"));
        }
        if kind == MediaKind::Video {
            *self.recorder.video_params.lock() = Some(params);
            self.recorder.param_sets.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn replace_track(&self, kind: MediaKind, track: Option<TrackRef>) -> PeerResult<()> {
        let mut senders = self.recorder.senders.lock();
        let Some(slot) = senders.get_mut(&kind) else {
            return Err(PeerError::new("replace_track", "no sender"));
        };
        *slot = track.map(|t| t.id().to_string());
        Ok(())
    }

    async fn restart_ice(&self) -> PeerResult<()> {
        self.recorder.ice_restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn take_ice_events(&self) -> Option<mpsc::UnboundedReceiver<IceConnectionState>> {
        self.ice_rx.lock().take()
    }

    async fn close(&self) -> PeerResult<()> {
        self.recorder.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out [`MockPeer`]s and keeps a recorder for each.
pub struct MockPeerFactory {
    recorders: Mutex<Vec<Arc<PeerRecorder>>>,
    supported_codecs: Vec<VideoCodec>,
    stall_gathering: AtomicBool,
}

impl MockPeerFactory {
    pub fn new() -> Arc<Self> {
        Self::with_codecs(VideoCodec::ALL.to_vec())
    }

    pub fn with_codecs(supported_codecs: Vec<VideoCodec>) -> Arc<Self> {
        Arc::new(Self {
            recorders: Mutex::new(Vec::new()),
            supported_codecs,
            stall_gathering: AtomicBool::new(false),
        })
    }

    /// Connections created from now on never report gathering complete.
    pub fn stall_gathering(&self) {
        self.stall_gathering.store(true, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.recorders.lock().len()
    }

    pub fn recorder(&self, index: usize) -> Arc<PeerRecorder> {
        Arc::clone(&self.recorders.lock()[index])
    }

    pub fn last(&self) -> Arc<PeerRecorder> {
        let recorders = self.recorders.lock();
        Arc::clone(recorders.last().expect("no peer connection created"))
    }
}

#[async_trait]
impl PeerConnectionFactory for MockPeerFactory {
    async fn create(&self) -> PeerResult<Box<dyn PeerConnection>> {
        let (ice_tx, ice_rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(PeerRecorder {
            offers: Mutex::new(Vec::new()),
            local_description: Mutex::new(None),
            remote_answer: Mutex::new(None),
            senders: Mutex::new(HashMap::new()),
            video_params: Mutex::new(None),
            param_sets: AtomicUsize::new(0),
            codec_preference: Mutex::new(None),
            ice_restarts: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            fail_params: AtomicBool::new(false),
            ice_tx,
        });
        self.recorders.lock().push(Arc::clone(&recorder));
        Ok(Box::new(MockPeer {
            recorder,
            ice_rx: Mutex::new(Some(ice_rx)),
            supported_codecs: self.supported_codecs.clone(),
            stall_gathering: self.stall_gathering.load(Ordering::SeqCst),
        }))
    }
}

// ============================================================================
// WHIP endpoint
// ============================================================================

/// WHIP server answering POST with 201 + Location and DELETE with 200.
pub async fn whip_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(WHIP_PATH))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("Location", RESOURCE_PATH)
                .insert_header("ETag", "\"v1\"")
                .set_body_raw(MOCK_ANSWER, "application/sdp"),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(RESOURCE_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

pub fn endpoint(server: &MockServer) -> PublishEndpoint {
    PublishEndpoint::new(format!("{}{}", server.uri(), WHIP_PATH))
}

pub async fn requests_with_method(server: &MockServer, verb: &str) -> Vec<wiremock::Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.method.as_str() == verb)
        .collect()
}

/// Short timings so tests run against real time.
pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        ice_gathering_timeout: Duration::from_millis(200),
        enforcement_interval: Duration::from_millis(50),
        mailbox_capacity: 64,
    }
}

pub fn publisher(
    server: &MockServer,
    factory: Arc<MockPeerFactory>,
    bus: Arc<RoomBus>,
) -> PublisherBuilder {
    Publisher::builder(StreamIdentity::new(ROOM, STREAM_ID), endpoint(server))
        .settings(fast_settings())
        .peer_factory(factory)
        .bus(bus)
}

// ============================================================================
// Bus
// ============================================================================

pub struct StatusFeed {
    rx: broadcast::Receiver<String>,
}

impl StatusFeed {
    pub fn subscribe(bus: &RoomBus) -> Self {
        Self {
            rx: bus.subscribe(&topics::status(ROOM)),
        }
    }

    /// Next status event, skipping device events.
    pub async fn next(&mut self) -> StatusEvent {
        loop {
            let payload = tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
                .await
                .expect("timed out waiting for status")
                .expect("status topic closed");
            if let Ok(event) = serde_json::from_str::<StatusEvent>(&payload) {
                return event;
            }
        }
    }

    pub async fn expect(&mut self, status: StreamStatus) -> StatusEvent {
        let event = self.next().await;
        assert_eq!(event.status, status, "unexpected status event {:?}", event);
        event
    }

    /// Statuses already delivered, without waiting.
    pub fn drain(&mut self) -> Vec<StreamStatus> {
        let mut statuses = Vec::new();
        while let Ok(payload) = self.rx.try_recv() {
            if let Ok(event) = serde_json::from_str::<StatusEvent>(&payload) {
                statuses.push(event.status);
            }
        }
        statuses
    }

    /// Raw payloads already delivered, without waiting.
    pub fn drain_raw(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        while let Ok(payload) = self.rx.try_recv() {
            payloads.push(payload);
        }
        payloads
    }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

pub async fn wait_for_state(handle: &PublisherHandle, state: SessionState) {
    let mut rx = handle.subscribe_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", state))
        .expect("publisher exited");
}

pub fn control(bus: &RoomBus, message: ControlMessage) {
    bus.publish(&topics::control(ROOM), serde_json::to_string(&message).unwrap());
}
