// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod config;
pub mod error;
pub mod logging;
pub mod media;
pub mod peer;
pub mod profile;
pub mod pubsub;
pub mod sdp;
pub mod session;
pub mod whip;

pub use config::{OnAirConfig, SessionConfig, StreamConfig};
pub use error::*;
pub use logging::{init_logging, LoggingConfig};
pub use media::{MediaKind, MediaSource, MediaTrack, SessionTracks, StaticMediaSource, TrackInfo, TrackRef};
pub use peer::{IceConnectionState, OfferOptions, PeerConnection, PeerConnectionFactory, PeerResult};
pub use profile::{DegradationPreference, EncodingParameters, EncodingProfile, Priority, VideoCodec};
pub use pubsub::{
    topics, ControlBus, ControlCommand, ControlMessage, DeviceEvent, RoomBus, StatusEvent,
    StreamStatus,
};
pub use sdp::{count_attribute, munge_offer, payload_type_for, MungedSdp, SdpWarning};
pub use session::{
    PublishEndpoint, Publisher, PublisherBuilder, PublisherHandle, SessionSettings,
    SessionSnapshot, SessionState, StreamIdentity, TeardownRequest,
};
pub use whip::{WhipAnswer, WhipClient, WhipConfig};
