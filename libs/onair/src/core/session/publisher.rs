// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! `Publisher` - per-stream actor that owns the publishing session.
//!
//! Local calls, control-bus commands, enforcement ticks and ICE events all
//! arrive as messages, so every change to the lifecycle state, the sender
//! parameters and the track slots happens on this one task. Negotiation is
//! awaited inline; everything else queues behind it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::encoding::EncodingController;
use super::identity::{PublishEndpoint, StreamIdentity};
use super::monitor::{spawn_ice_forwarder, IceAction, IceMonitor};
use super::negotiator::{Negotiated, Negotiator};
use super::state::{SessionSnapshot, SessionState, TeardownRequest};
use crate::core::config::OnAirConfig;
use crate::core::error::{IceError, PublishError, Result};
use crate::core::media::{MediaKind, MediaSource, SessionTracks, TrackRef};
use crate::core::peer::{IceConnectionState, PeerConnection, PeerConnectionFactory};
use crate::core::profile::EncodingProfile;
use crate::core::pubsub::{
    topics, ControlBus, ControlCommand, ControlMessage, DeviceEvent, StatusEvent, StreamStatus,
};
use crate::core::sdp::SdpWarning;
use crate::core::whip::{WhipClient, WhipConfig};

/// Session timing knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Upper bound on waiting for ICE gathering before posting the offer.
    pub ice_gathering_timeout: Duration,
    /// Period of the bitrate enforcement check while live.
    pub enforcement_interval: Duration,
    pub mailbox_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ice_gathering_timeout: Duration::from_secs(4),
            enforcement_interval: Duration::from_secs(2),
            mailbox_capacity: 256,
        }
    }
}

pub(crate) enum PublisherMessage {
    Start {
        tracks: Option<SessionTracks>,
        respond_to: oneshot::Sender<Result<SessionState>>,
    },
    Stop {
        respond_to: oneshot::Sender<SessionState>,
    },
    End {
        forced: bool,
        reason: Option<String>,
        respond_to: oneshot::Sender<SessionState>,
    },
    ReplaceTrack {
        kind: MediaKind,
        track: Option<TrackRef>,
        respond_to: oneshot::Sender<Result<()>>,
    },
    SetProfile {
        profile: EncodingProfile,
        respond_to: oneshot::Sender<Result<()>>,
    },
    GetSnapshot {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },
    IceState {
        generation: u64,
        state: IceConnectionState,
    },
    EnforceTick {
        generation: u64,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

// ============================================================================
// HANDLE
// ============================================================================

/// Handle to a running [`Publisher`].
#[derive(Clone)]
pub struct PublisherHandle {
    sender: mpsc::Sender<PublisherMessage>,
    cancel_token: CancellationToken,
    identity: StreamIdentity,
    state_rx: watch::Receiver<SessionState>,
    teardown_rx: watch::Receiver<Option<TeardownRequest>>,
}

impl PublisherHandle {
    pub fn identity(&self) -> &StreamIdentity {
        &self.identity
    }

    /// Negotiate and go live. `None` (or empty tracks) asks the media source.
    ///
    /// Already live: returns `Live` without renegotiating.
    pub async fn start_stream(&self, tracks: Option<SessionTracks>) -> Result<SessionState> {
        let (tx, rx) = oneshot::channel();
        self.send(PublisherMessage::Start {
            tracks,
            respond_to: tx,
        })
        .await?;
        Self::reply(rx).await?
    }

    /// Tear the session down. Resources are released before this returns.
    pub async fn stop_stream(&self) -> Result<SessionState> {
        let (tx, rx) = oneshot::channel();
        self.send(PublisherMessage::Stop { respond_to: tx }).await?;
        Self::reply(rx).await
    }

    pub async fn end_session(&self, reason: Option<String>) -> Result<SessionState> {
        self.end(false, reason).await
    }

    /// Always reaches `Ended`, even when stopping fails.
    pub async fn force_end(&self, reason: Option<String>) -> Result<SessionState> {
        self.end(true, reason).await
    }

    async fn end(&self, forced: bool, reason: Option<String>) -> Result<SessionState> {
        let (tx, rx) = oneshot::channel();
        self.send(PublisherMessage::End {
            forced,
            reason,
            respond_to: tx,
        })
        .await?;
        Self::reply(rx).await
    }

    /// Swap the source of the `kind` sender without renegotiation.
    pub async fn replace_track(&self, kind: MediaKind, track: Option<TrackRef>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(PublisherMessage::ReplaceTrack {
            kind,
            track,
            respond_to: tx,
        })
        .await?;
        Self::reply(rx).await?
    }

    /// Bitrate/framerate apply at the next enforcement tick; a codec change
    /// applies at the next full negotiation.
    pub async fn set_profile(&self, profile: EncodingProfile) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(PublisherMessage::SetProfile {
            profile,
            respond_to: tx,
        })
        .await?;
        Self::reply(rx).await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(PublisherMessage::GetSnapshot { respond_to: tx })
            .await?;
        Self::reply(rx).await
    }

    /// Latest lifecycle state without a mailbox round trip.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Resolves with `Some` once the session is ended.
    pub fn teardown_requested(&self) -> watch::Receiver<Option<TeardownRequest>> {
        self.teardown_rx.clone()
    }

    /// Stop any live session, drop the bus subscription and exit the actor.
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(PublisherMessage::Shutdown { respond_to: tx })
            .await
            .is_err()
        {
            // Actor already gone
            return Ok(());
        }
        let _ = rx.await;
        self.cancel_token.cancel();
        Ok(())
    }

    async fn send(&self, message: PublisherMessage) -> Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|e| PublishError::Internal(format!("channel send failed: {e}")))
    }

    async fn reply<T>(rx: oneshot::Receiver<T>) -> Result<T> {
        rx.await
            .map_err(|e| PublishError::Internal(format!("response receive failed: {e}")))
    }
}

// ============================================================================
// BUILDER
// ============================================================================

pub struct PublisherBuilder {
    identity: StreamIdentity,
    endpoint: PublishEndpoint,
    profile: EncodingProfile,
    settings: SessionSettings,
    whip: WhipConfig,
    bus: Option<Arc<dyn ControlBus>>,
    peer_factory: Option<Arc<dyn PeerConnectionFactory>>,
    media_source: Option<Arc<dyn MediaSource>>,
}

impl PublisherBuilder {
    pub fn profile(mut self, profile: EncodingProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn auth_token(mut self, token: Option<String>) -> Self {
        self.whip.auth_token = token;
        self
    }

    pub fn whip_timeout(mut self, timeout: Duration) -> Self {
        self.whip.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn bus(mut self, bus: Arc<dyn ControlBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn peer_factory(mut self, factory: Arc<dyn PeerConnectionFactory>) -> Self {
        self.peer_factory = Some(factory);
        self
    }

    pub fn media_source(mut self, source: Arc<dyn MediaSource>) -> Self {
        self.media_source = Some(source);
        self
    }

    /// Spawn the actor on the current tokio runtime.
    pub fn spawn(self) -> Result<PublisherHandle> {
        if self.identity.room.trim().is_empty() || self.identity.stream_id.trim().is_empty() {
            return Err(PublishError::Configuration(
                "stream identity needs a room and a stream id".into(),
            ));
        }
        if self.settings.mailbox_capacity == 0 {
            return Err(PublishError::Configuration(
                "mailbox capacity must be at least 1".into(),
            ));
        }
        if self.settings.enforcement_interval.is_zero() {
            return Err(PublishError::Configuration(
                "enforcement interval must be greater than zero".into(),
            ));
        }
        self.profile.validate()?;

        let peer_factory = match self.peer_factory {
            Some(factory) => factory,
            None => default_peer_factory()?,
        };

        let mut whip = self.whip;
        whip.endpoint_url = self.endpoint.as_str().to_string();
        let negotiator = Negotiator::new(WhipClient::new(whip)?, self.settings.ice_gathering_timeout);

        let control_rx = self
            .bus
            .as_ref()
            .map(|bus| bus.subscribe(&topics::control(&self.identity.room)));

        let (sender, receiver) = mpsc::channel(self.settings.mailbox_capacity);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (teardown_tx, teardown_rx) = watch::channel(None);
        let cancel_token = CancellationToken::new();

        if let Some((room, participant)) = self.endpoint.identity_hint() {
            if participant != self.identity.stream_id || room != self.identity.room {
                tracing::debug!(
                    "[Publisher] Endpoint path suggests {}/{}, publishing as {}",
                    room,
                    participant,
                    self.identity
                );
            }
        }

        let actor = Publisher {
            identity: self.identity.clone(),
            status_topic: topics::status(&self.identity.room),
            profile: self.profile,
            settings: self.settings,
            negotiator,
            peer_factory,
            media_source: self.media_source,
            bus: self.bus,
            control_rx,
            mailbox: sender.downgrade(),
            receiver,
            cancel_token: cancel_token.clone(),
            state: SessionState::Idle,
            state_tx,
            teardown_tx,
            session: None,
            last_tracks: None,
            generation: 0,
            negotiations: 0,
            ice_restarts: 0,
            last_error: None,
        };
        tokio::spawn(actor.run());

        Ok(PublisherHandle {
            sender,
            cancel_token,
            identity: self.identity,
            state_rx,
            teardown_rx,
        })
    }
}

#[cfg(feature = "webrtc-rs")]
fn default_peer_factory() -> Result<Arc<dyn PeerConnectionFactory>> {
    Ok(Arc::new(crate::webrtc::WebRtcPeerFactory::new()?))
}

#[cfg(not(feature = "webrtc-rs"))]
fn default_peer_factory() -> Result<Arc<dyn PeerConnectionFactory>> {
    Err(PublishError::Configuration(
        "no peer connection factory configured".into(),
    ))
}

// ============================================================================
// ACTOR
// ============================================================================

/// One negotiated peer connection and everything hanging off it.
struct Session {
    generation: u64,
    pc: Box<dyn PeerConnection>,
    tracks: SessionTracks,
    encoding: EncodingController,
    monitor: IceMonitor,
    resource_url: Option<String>,
    sdp_warnings: Vec<SdpWarning>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Publisher {
    identity: StreamIdentity,
    status_topic: String,
    profile: EncodingProfile,
    settings: SessionSettings,
    negotiator: Negotiator,
    peer_factory: Arc<dyn PeerConnectionFactory>,
    media_source: Option<Arc<dyn MediaSource>>,
    bus: Option<Arc<dyn ControlBus>>,
    control_rx: Option<broadcast::Receiver<String>>,
    /// Weak so that dropping every handle ends the actor.
    mailbox: mpsc::WeakSender<PublisherMessage>,
    receiver: mpsc::Receiver<PublisherMessage>,
    cancel_token: CancellationToken,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    teardown_tx: watch::Sender<Option<TeardownRequest>>,
    session: Option<Session>,
    last_tracks: Option<SessionTracks>,
    generation: u64,
    negotiations: u64,
    ice_restarts: u64,
    last_error: Option<String>,
}

impl Publisher {
    pub fn builder(identity: StreamIdentity, endpoint: PublishEndpoint) -> PublisherBuilder {
        PublisherBuilder {
            identity,
            endpoint,
            profile: EncodingProfile::default(),
            settings: SessionSettings::default(),
            whip: WhipConfig::default(),
            bus: None,
            peer_factory: None,
            media_source: None,
        }
    }

    /// Builder seeded from `onair.yaml` values.
    pub fn from_config(config: &OnAirConfig) -> Result<PublisherBuilder> {
        config.validate()?;
        let mut builder = Self::builder(config.identity(), config.endpoint())
            .profile(config.encoding)
            .settings(config.session.settings());
        builder.whip = config.whip.clone();
        Ok(builder)
    }

    async fn run(mut self) {
        tracing::info!("[Publisher] {} started", self.identity);
        self.publish_status(StreamStatus::Ready, None);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    tracing::debug!("[Publisher] {} cancelled", self.identity);
                    self.teardown_session().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            if !self.handle_message(message).await {
                                break;
                            }
                        }
                        None => {
                            tracing::debug!("[Publisher] {} mailbox closed", self.identity);
                            self.teardown_session().await;
                            break;
                        }
                    }
                }

                payload = next_control(&mut self.control_rx) => {
                    match payload {
                        Ok(payload) => self.handle_control_payload(&payload).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(
                                "[Publisher] Control bus lagged, {} commands skipped",
                                skipped
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::warn!("[Publisher] Control bus closed");
                            self.control_rx = None;
                        }
                    }
                }
            }
        }

        tracing::info!("[Publisher] {} exited in state {}", self.identity, self.state);
    }

    /// Returns `false` when the actor should exit.
    async fn handle_message(&mut self, message: PublisherMessage) -> bool {
        match message {
            PublisherMessage::Start { tracks, respond_to } => {
                let result = self.start(tracks).await;
                let _ = respond_to.send(result);
            }
            PublisherMessage::Stop { respond_to } => {
                let state = self.stop().await;
                let _ = respond_to.send(state);
            }
            PublisherMessage::End {
                forced,
                reason,
                respond_to,
            } => {
                let state = self.end(forced, reason).await;
                let _ = respond_to.send(state);
            }
            PublisherMessage::ReplaceTrack {
                kind,
                track,
                respond_to,
            } => {
                let result = self.replace_track(kind, track).await;
                let _ = respond_to.send(result);
            }
            PublisherMessage::SetProfile {
                profile,
                respond_to,
            } => {
                let _ = respond_to.send(self.set_profile(profile));
            }
            PublisherMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
            PublisherMessage::IceState { generation, state } => {
                self.on_ice_state(generation, state).await;
            }
            PublisherMessage::EnforceTick { generation } => {
                self.on_enforce_tick(generation).await;
            }
            PublisherMessage::Shutdown { respond_to } => {
                self.teardown_session().await;
                self.control_rx = None;
                let _ = respond_to.send(());
                return false;
            }
        }
        true
    }

    async fn handle_control_payload(&mut self, payload: &str) {
        let message = match ControlMessage::parse(payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("[Publisher] Dropping malformed control message: {}", e);
                return;
            }
        };

        if message.target_id != self.identity.stream_id {
            tracing::trace!(
                "[Publisher] Ignoring {:?} for {}",
                message.command,
                message.target_id
            );
            return;
        }

        tracing::info!(
            "[Publisher] Remote {:?} (reason: {})",
            message.command,
            message.reason.as_deref().unwrap_or("none")
        );

        match message.command {
            ControlCommand::StartStream => {
                if let Err(e) = self.start(None).await {
                    tracing::warn!("[Publisher] Remote start failed: {}", e);
                }
            }
            ControlCommand::StopStream => {
                self.stop().await;
            }
            ControlCommand::EndSession => {
                self.end(false, message.reason).await;
            }
            ControlCommand::ForceEndSession => {
                self.end(true, message.reason).await;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    async fn start(&mut self, tracks: Option<SessionTracks>) -> Result<SessionState> {
        if self.state.is_ended() {
            return Err(PublishError::SessionEnded);
        }
        if !self.state.can_start() {
            tracing::debug!("[Publisher] Start while {}, no renegotiation", self.state);
            self.publish_status(self.state.status(), None);
            return Ok(self.state);
        }

        let tracks = match self.resolve_tracks(tracks).await {
            Ok(tracks) => tracks,
            Err(e) => {
                tracing::warn!("[Publisher] Cannot start: {}", e);
                self.publish_status(StreamStatus::Error, Some(e.user_message()));
                return Err(e);
            }
        };

        self.last_error = None;
        self.transition(SessionState::Negotiating);
        self.generation += 1;
        self.negotiations += 1;

        let pc = match self.peer_factory.create().await {
            Ok(pc) => pc,
            Err(e) => {
                let err = PublishError::from(e);
                self.fail(&err);
                return Err(err);
            }
        };

        match self.negotiator.publish(&*pc, &tracks, &self.profile).await {
            Ok(negotiated) => {
                self.go_live(pc, tracks, negotiated).await;
                Ok(self.state)
            }
            Err(e) => {
                tracing::error!("[Publisher] Negotiation failed: {}", e);
                if let Err(close_err) = pc.close().await {
                    tracing::warn!("[Publisher] Failed to close peer connection: {}", close_err);
                }
                self.fail(&e);
                Err(e)
            }
        }
    }

    async fn resolve_tracks(&self, tracks: Option<SessionTracks>) -> Result<SessionTracks> {
        if let Some(tracks) = tracks.filter(|t| !t.is_empty()) {
            return Ok(tracks);
        }
        if let Some(source) = &self.media_source {
            match source.acquire().await {
                Ok(tracks) if !tracks.is_empty() => return Ok(tracks),
                Ok(_) => tracing::debug!("[Publisher] Media source has no tracks"),
                Err(e) => tracing::warn!("[Publisher] Media source unavailable: {}", e),
            }
        }
        self.last_tracks
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(PublishError::DevicesNotReady)
    }

    async fn go_live(
        &mut self,
        pc: Box<dyn PeerConnection>,
        tracks: SessionTracks,
        negotiated: Negotiated,
    ) {
        let generation = self.generation;
        let encoding = EncodingController::new(self.profile);
        if let Err(e) = encoding.apply_now(&*pc).await {
            tracing::warn!("[Publisher] Initial encoding apply failed: {}", e);
        }

        // Session tasks only hold weak senders: dropping the last handle still
        // closes the mailbox and tears the session down.
        let cancel = self.cancel_token.child_token();
        let mut tasks = Vec::new();
        if let Some(events) = pc.take_ice_events() {
            tasks.push(spawn_ice_forwarder(
                events,
                generation,
                self.mailbox.clone(),
                cancel.clone(),
            ));
        }
        tasks.push(spawn_enforcement_timer(
            self.settings.enforcement_interval,
            generation,
            self.mailbox.clone(),
            cancel.clone(),
        ));

        if let Some(video) = tracks.video() {
            self.publish_device(video);
        }

        self.last_tracks = Some(tracks.clone());
        self.session = Some(Session {
            generation,
            pc,
            tracks,
            encoding,
            monitor: IceMonitor::new(),
            resource_url: negotiated.resource_url,
            sdp_warnings: negotiated.warnings,
            cancel,
            tasks,
        });
        self.transition(SessionState::Live);
    }

    async fn stop(&mut self) -> SessionState {
        match self.state {
            SessionState::Ended => {}
            SessionState::Idle => self.publish_status(StreamStatus::Ready, None),
            SessionState::Failed => self.transition(SessionState::Idle),
            SessionState::Stopping | SessionState::Stopped => {
                self.publish_status(StreamStatus::Stopped, None)
            }
            SessionState::Negotiating | SessionState::Live | SessionState::Restarting => {
                self.transition(SessionState::Stopping);
                self.teardown_session().await;
                self.transition(SessionState::Stopped);
            }
        }
        self.state
    }

    async fn end(&mut self, forced: bool, reason: Option<String>) -> SessionState {
        if self.state.is_ended() {
            tracing::debug!("[Publisher] Already ended");
            return self.state;
        }

        // Best-effort: teardown logs its own failures and always completes.
        self.teardown_session().await;

        self.set_state(SessionState::Ended);
        self.publish_status(SessionState::ended_status(forced), reason.clone());
        self.teardown_tx.send_replace(Some(TeardownRequest { reason, forced }));
        self.control_rx = None;
        tracing::info!(
            "[Publisher] {} ended ({})",
            self.identity,
            if forced { "forced" } else { "requested" }
        );
        self.state
    }

    async fn replace_track(&mut self, kind: MediaKind, track: Option<TrackRef>) -> Result<()> {
        if let Some(track) = &track {
            if track.kind() != kind {
                return Err(PublishError::InvalidTrack(format!(
                    "cannot put {} track '{}' in the {} slot",
                    track.kind(),
                    track.id(),
                    kind
                )));
            }
        }

        let Some(session) = self.session.as_mut() else {
            return Err(PublishError::NoActiveSession);
        };
        if !session.pc.has_sender(kind) {
            return Err(PublishError::NoActiveSession);
        }

        session.pc.replace_track(kind, track.clone()).await?;
        session.tracks.set(kind, track.clone())?;
        self.last_tracks = Some(session.tracks.clone());
        tracing::info!(
            "[Publisher] Replaced {} track with {}",
            kind,
            track.as_ref().map(|t| t.id()).unwrap_or("nothing")
        );

        if kind == MediaKind::Video {
            if let Err(e) = session.encoding.apply_now(&*session.pc).await {
                tracing::warn!("[Publisher] Encoding apply after replacement failed: {}", e);
            }
            if let Some(track) = &track {
                self.publish_device(track);
            }
        }
        Ok(())
    }

    fn set_profile(&mut self, profile: EncodingProfile) -> Result<()> {
        profile.validate()?;
        if profile.video_codec != self.profile.video_codec && self.session.is_some() {
            tracing::info!(
                "[Publisher] Codec change to {} applies at the next negotiation",
                profile.video_codec
            );
        }
        self.profile = profile;
        if let Some(session) = self.session.as_mut() {
            session.encoding.set_profile(profile);
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Session events
    // ------------------------------------------------------------------------

    async fn on_enforce_tick(&mut self, generation: u64) {
        if self.state != SessionState::Live {
            return;
        }
        let Some(session) = self.session.as_ref().filter(|s| s.generation == generation) else {
            return;
        };
        if let Err(e) = session.encoding.enforce(&*session.pc).await {
            tracing::warn!("[Publisher] Encoding enforcement failed: {}", e);
        }
    }

    async fn on_ice_state(&mut self, generation: u64, ice: IceConnectionState) {
        let state = self.state;
        let Some(session) = self.session.as_mut().filter(|s| s.generation == generation) else {
            tracing::trace!("[Publisher] Stale ICE event from session {}", generation);
            return;
        };

        match session.monitor.on_state(ice, state) {
            IceAction::None => {}
            IceAction::Restart => self.restart_ice().await,
            IceAction::Fail => {
                let err = PublishError::Ice(IceError::RestartFailed(
                    "ICE failed again before reconnecting".into(),
                ));
                tracing::error!("[Publisher] {}", err);
                self.teardown_session().await;
                self.fail(&err);
            }
            IceAction::ReportDisconnected => {
                tracing::warn!("[Publisher] ICE disconnected, waiting for recovery");
                self.publish_status(
                    StreamStatus::Error,
                    Some("Connection interrupted, reconnecting".to_string()),
                );
            }
            IceAction::Reconnected => {
                tracing::info!("[Publisher] ICE recovered");
                self.publish_status(StreamStatus::Streaming, None);
            }
            IceAction::Close => {
                tracing::warn!("[Publisher] Peer connection closed");
                self.teardown_session().await;
                self.transition(SessionState::Stopped);
            }
        }
    }

    async fn restart_ice(&mut self) {
        tracing::warn!("[Publisher] ICE failed, restarting");
        self.transition(SessionState::Restarting);
        self.ice_restarts += 1;
        self.negotiations += 1;

        let negotiator = &self.negotiator;
        let profile = self.profile;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let result = match session.pc.restart_ice().await {
            Ok(()) => negotiator.renegotiate(&*session.pc, &profile, true).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(negotiated) => {
                session.sdp_warnings = negotiated.warnings;
                let previous = std::mem::replace(&mut session.resource_url, negotiated.resource_url);
                if let Some(old) = previous.filter(|old| Some(old) != session.resource_url.as_ref())
                {
                    negotiator.terminate(&old).await;
                }
                if let Err(e) = session.encoding.apply_now(&*session.pc).await {
                    tracing::warn!("[Publisher] Encoding apply after restart failed: {}", e);
                }
                self.transition(SessionState::Live);
            }
            Err(e) => {
                let err = PublishError::Ice(IceError::RestartFailed(e.to_string()));
                tracing::error!("[Publisher] {}", err);
                self.teardown_session().await;
                self.fail(&err);
            }
        }
    }

    /// Cancel session tasks, wait for them, release the WHIP resource, close.
    async fn teardown_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        session.cancel.cancel();
        for task in session.tasks {
            if let Err(e) = task.await {
                tracing::warn!("[Publisher] Session task ended abnormally: {}", e);
            }
        }

        if let Some(resource_url) = &session.resource_url {
            self.negotiator.terminate(resource_url).await;
        }

        if let Err(e) = session.pc.close().await {
            tracing::warn!("[Publisher] Failed to close peer connection: {}", e);
        }
        tracing::debug!("[Publisher] Session {} torn down", session.generation);
    }

    // ------------------------------------------------------------------------
    // State and emission
    // ------------------------------------------------------------------------

    fn transition(&mut self, next: SessionState) {
        tracing::info!("[Publisher] {} -> {}", self.state, next);
        self.set_state(next);
        self.publish_status(next.status(), None);
    }

    fn set_state(&mut self, next: SessionState) {
        self.state = next;
        self.state_tx.send_replace(next);
    }

    fn fail(&mut self, err: &PublishError) {
        let message = err.user_message();
        self.last_error = Some(message.clone());
        tracing::info!("[Publisher] {} -> {}", self.state, SessionState::Failed);
        self.set_state(SessionState::Failed);
        self.publish_status(StreamStatus::Error, Some(message));
    }

    fn publish_status(&self, status: StreamStatus, message: Option<String>) {
        let Some(bus) = &self.bus else {
            return;
        };
        let mut event = StatusEvent::new(&self.identity.stream_id, status);
        event.message = message;
        match serde_json::to_string(&event) {
            Ok(payload) => bus.publish(&self.status_topic, payload),
            Err(e) => tracing::error!("[Publisher] Failed to encode status event: {}", e),
        }
    }

    fn publish_device(&self, track: &TrackRef) {
        let Some(bus) = &self.bus else {
            return;
        };
        let event = DeviceEvent::from_track_info(&self.identity.stream_id, track.info());
        match serde_json::to_string(&event) {
            Ok(payload) => bus.publish(&self.status_topic, payload),
            Err(e) => tracing::error!("[Publisher] Failed to encode device event: {}", e),
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let tracks = self.session.as_ref().map(|s| &s.tracks);
        SessionSnapshot {
            state: self.state,
            generation: self.generation,
            negotiations: self.negotiations,
            ice_restarts: self.ice_restarts,
            resource_url: self.session.as_ref().and_then(|s| s.resource_url.clone()),
            video_track: tracks
                .and_then(|t| t.video())
                .map(|t| t.id().to_string()),
            audio_track: tracks
                .and_then(|t| t.audio())
                .map(|t| t.id().to_string()),
            last_error: self.last_error.clone(),
            sdp_warnings: self
                .session
                .as_ref()
                .map(|s| s.sdp_warnings.clone())
                .unwrap_or_default(),
        }
    }
}

async fn next_control(
    rx: &mut Option<broadcast::Receiver<String>>,
) -> std::result::Result<String, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn spawn_enforcement_timer(
    period: Duration,
    generation: u64,
    mailbox: mpsc::WeakSender<PublisherMessage>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let Some(sender) = mailbox.upgrade() else {
                        break;
                    };
                    match sender.try_send(PublisherMessage::EnforceTick { generation }) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            tracing::debug!("[Publisher] Mailbox full, skipping enforcement tick");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => break,
                    }
                }
            }
        }
    })
}
