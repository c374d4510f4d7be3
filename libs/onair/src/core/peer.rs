// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Platform adapter seam.
//!
//! Everything the engine needs from a WebRTC stack, and nothing else. The
//! engine writes SDP logic and lifecycle once; adapters (see `onair::webrtc`)
//! translate these calls to a concrete stack.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::error::PeerError;
use super::media::{MediaKind, TrackRef};
use super::profile::{EncodingParameters, VideoCodec};

pub type PeerResult<T> = std::result::Result<T, PeerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IceConnectionState::New => "new",
            IceConnectionState::Checking => "checking",
            IceConnectionState::Connected => "connected",
            IceConnectionState::Completed => "completed",
            IceConnectionState::Disconnected => "disconnected",
            IceConnectionState::Failed => "failed",
            IceConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Offer options. Receive audio/video are always disabled for a publisher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OfferOptions {
    pub ice_restart: bool,
}

/// One outbound peer connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Attach `track` on a send-only transceiver.
    async fn add_track(&self, track: TrackRef) -> PeerResult<()>;

    /// Order the video transceiver's codecs as `[codec, ...rest]`.
    /// Returns `false` when the stack does not offer `codec`.
    async fn set_video_codec_preference(&self, codec: VideoCodec) -> PeerResult<bool>;

    async fn create_offer(&self, options: OfferOptions) -> PeerResult<String>;

    async fn set_local_description(&self, sdp: String) -> PeerResult<()>;

    /// Resolves once ICE gathering reaches `complete`. Callers bound the wait.
    async fn gathering_complete(&self);

    async fn local_description(&self) -> Option<String>;

    async fn set_remote_answer(&self, sdp: String) -> PeerResult<()>;

    fn has_sender(&self, kind: MediaKind) -> bool;

    /// Current encoding layer of the sender for `kind`, if any.
    async fn sender_parameters(&self, kind: MediaKind) -> Option<EncodingParameters>;

    async fn set_sender_parameters(
        &self,
        kind: MediaKind,
        params: EncodingParameters,
    ) -> PeerResult<()>;

    /// Swap the sender's source without renegotiation. `None` keeps the m-line
    /// active but sends nothing.
    async fn replace_track(&self, kind: MediaKind, track: Option<TrackRef>) -> PeerResult<()>;

    async fn restart_ice(&self) -> PeerResult<()>;

    /// ICE connection state stream. Yields `Some` once per connection.
    fn take_ice_events(&self) -> Option<mpsc::UnboundedReceiver<IceConnectionState>>;

    async fn close(&self) -> PeerResult<()>;
}

/// Creates a fresh peer connection for every negotiation attempt.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self) -> PeerResult<Box<dyn PeerConnection>>;
}
