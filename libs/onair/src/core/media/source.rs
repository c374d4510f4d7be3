// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use async_trait::async_trait;

use super::track::{MediaKind, TrackRef};
use crate::core::error::{PublishError, Result};

/// Zero-or-one video and zero-or-one audio track for a session.
#[derive(Clone, Default)]
pub struct SessionTracks {
    video: Option<TrackRef>,
    audio: Option<TrackRef>,
}

impl SessionTracks {
    pub fn new(video: Option<TrackRef>, audio: Option<TrackRef>) -> Result<Self> {
        check_kind(video.as_ref(), MediaKind::Video)?;
        check_kind(audio.as_ref(), MediaKind::Audio)?;
        Ok(Self { video, audio })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn video(&self) -> Option<&TrackRef> {
        self.video.as_ref()
    }

    pub fn audio(&self) -> Option<&TrackRef> {
        self.audio.as_ref()
    }

    pub fn get(&self, kind: MediaKind) -> Option<&TrackRef> {
        match kind {
            MediaKind::Video => self.video.as_ref(),
            MediaKind::Audio => self.audio.as_ref(),
        }
    }

    /// Install `track` in its slot. The kind must match.
    pub fn set(&mut self, kind: MediaKind, track: Option<TrackRef>) -> Result<()> {
        check_kind(track.as_ref(), kind)?;
        match kind {
            MediaKind::Video => self.video = track,
            MediaKind::Audio => self.audio = track,
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }

    /// Installed tracks, video first.
    pub fn iter(&self) -> impl Iterator<Item = &TrackRef> {
        self.video.iter().chain(self.audio.iter())
    }
}

impl std::fmt::Debug for SessionTracks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTracks")
            .field("video", &self.video.as_ref().map(|t| t.id().to_string()))
            .field("audio", &self.audio.as_ref().map(|t| t.id().to_string()))
            .finish()
    }
}

fn check_kind(track: Option<&TrackRef>, expected: MediaKind) -> Result<()> {
    match track {
        Some(track) if track.kind() != expected => Err(PublishError::InvalidTrack(format!(
            "track '{}' is {} but the slot is {}",
            track.id(),
            track.kind(),
            expected
        ))),
        _ => Ok(()),
    }
}

/// Capture collaborator that supplies tracks when a start arrives without any
/// (e.g. a remote `START_STREAM`).
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self) -> Result<SessionTracks>;
}

/// Hands out the same pre-opened tracks on every acquire.
#[derive(Debug, Clone)]
pub struct StaticMediaSource {
    tracks: SessionTracks,
}

impl StaticMediaSource {
    pub fn new(tracks: SessionTracks) -> Self {
        Self { tracks }
    }
}

#[async_trait]
impl MediaSource for StaticMediaSource {
    async fn acquire(&self) -> Result<SessionTracks> {
        if self.tracks.is_empty() {
            return Err(PublishError::DevicesNotReady);
        }
        Ok(self.tracks.clone())
    }
}
