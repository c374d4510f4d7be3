// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! webrtc-rs implementation of the peer connection seam.
//!
//! [`WebRtcPeerFactory`] owns a single webrtc-rs `API` (media engine plus
//! interceptors) and hands out one [`WebRtcPeerConnection`] per negotiation.
//! Capture code feeds media through [`SampleTrack`].

mod codecs;
mod connection;
mod factory;
mod track;

pub use connection::WebRtcPeerConnection;
pub use factory::WebRtcPeerFactory;
pub use track::SampleTrack;
