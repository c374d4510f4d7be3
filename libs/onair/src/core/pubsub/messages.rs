// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Control-plane wire messages (camelCase JSON).

use serde::{Deserialize, Serialize};

use crate::core::media::TrackInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlCommand {
    StartStream,
    StopStream,
    EndSession,
    ForceEndSession,
}

/// Producer command delivered on `room:{room}:control`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlMessage {
    pub command: ControlCommand,
    #[serde(alias = "streamId")]
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl ControlMessage {
    pub fn new(command: ControlCommand, target_id: impl Into<String>) -> Self {
        Self {
            command,
            target_id: target_id.into(),
            reason: None,
            timestamp: Some(chrono::Utc::now().timestamp_millis()),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn parse(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamStatus {
    Ready,
    Starting,
    Streaming,
    Stopping,
    Stopped,
    Error,
    Ended,
    SessionEnded,
}

/// Publisher status delivered on `room:{room}:status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub stream_id: String,
    pub status: StreamStatus,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Sanitized, human-readable detail. Never raw error text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusEvent {
    pub fn new(stream_id: impl Into<String>, status: StreamStatus) -> Self {
        Self {
            stream_id: stream_id.into(),
            status,
            timestamp: chrono::Utc::now().timestamp_millis(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Device details published alongside status when a video track is installed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEvent {
    pub stream_id: String,
    pub device_label: String,
    pub device_id: String,
    pub is_screen_share: bool,
    pub capabilities: serde_json::Value,
}

impl DeviceEvent {
    pub fn from_track_info(stream_id: impl Into<String>, info: TrackInfo) -> Self {
        Self {
            stream_id: stream_id.into(),
            device_label: info.label,
            device_id: info.device_id,
            is_screen_share: info.is_screen_share,
            capabilities: info.capabilities,
        }
    }
}
