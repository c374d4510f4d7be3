// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device description surfaced to the dashboard when a video track is installed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub label: String,
    pub device_id: String,
    pub is_screen_share: bool,
    /// Opaque capture capabilities (resolution ranges, frame rates, ...).
    pub capabilities: serde_json::Value,
}

/// Opaque handle to a live capture track.
///
/// The engine only reads `kind` and toggles `enabled` / `stop`; everything else
/// belongs to the capture layer. Platform adapters downcast through
/// [`MediaTrack::as_any`] to reach their concrete track type.
pub trait MediaTrack: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    fn info(&self) -> TrackInfo;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    fn stop(&self);

    fn as_any(&self) -> &dyn Any;
}

pub type TrackRef = Arc<dyn MediaTrack>;
