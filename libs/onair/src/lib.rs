// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! OnAir: WHIP publishing session engine.
//!
//! Negotiates a single outbound WebRTC session against a WHIP endpoint, keeps
//! the video sender's encoding parameters pinned to the configured profile,
//! swaps source tracks without renegotiation, recovers from a transient ICE
//! failure and exposes the start/stop/end state machine that a room-scoped
//! control bus drives.
//!
//! The engine only talks to the media stack through [`core::peer`]. The
//! `webrtc-rs` feature (on by default) provides an implementation of that seam
//! in [`webrtc`].

#![allow(clippy::type_complexity)] // Complex types are clear in context

pub mod core;

#[cfg(feature = "webrtc-rs")]
pub mod webrtc;

pub use core::{
    init_logging, munge_offer, topics, ControlBus, ControlCommand, ControlMessage, DeviceEvent,
    EncodingParameters, EncodingProfile, IceConnectionState, IceError, LoggingConfig,
    MediaKind, MediaSource, MediaTrack, MungedSdp, OfferOptions, OnAirConfig, PeerConnection,
    PeerConnectionFactory, PeerError, PublishEndpoint, PublishError, Publisher, PublisherBuilder,
    PublisherHandle, Result, RoomBus, SdpWarning, SessionSettings, SessionSnapshot, SessionState,
    SessionTracks, StaticMediaSource, StatusEvent, StreamIdentity, StreamStatus, TeardownRequest,
    TrackInfo, TrackRef, VideoCodec, WhipClient, WhipConfig,
};
