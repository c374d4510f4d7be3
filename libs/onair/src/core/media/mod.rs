// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod source;
mod track;

pub use source::{MediaSource, SessionTracks, StaticMediaSource};
pub use track::{MediaKind, MediaTrack, TrackInfo, TrackRef};
