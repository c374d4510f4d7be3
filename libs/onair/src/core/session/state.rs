// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};

use crate::core::pubsub::StreamStatus;
use crate::core::sdp::SdpWarning;

/// Publisher lifecycle.
///
/// `Failed` and `Stopped` accept a new start; `Ended` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Negotiating,
    Live,
    Restarting,
    Stopping,
    Stopped,
    Ended,
    Failed,
}

impl SessionState {
    /// Status published on entering this state. `Ended` depends on how the
    /// session was ended, see [`SessionState::ended_status`].
    pub fn status(&self) -> StreamStatus {
        match self {
            SessionState::Idle => StreamStatus::Ready,
            SessionState::Negotiating => StreamStatus::Starting,
            SessionState::Live => StreamStatus::Streaming,
            SessionState::Restarting => StreamStatus::Starting,
            SessionState::Stopping => StreamStatus::Stopping,
            SessionState::Stopped => StreamStatus::Stopped,
            SessionState::Failed => StreamStatus::Error,
            SessionState::Ended => StreamStatus::Ended,
        }
    }

    pub fn ended_status(forced: bool) -> StreamStatus {
        if forced {
            StreamStatus::SessionEnded
        } else {
            StreamStatus::Ended
        }
    }

    /// A session (peer connection, timers) exists in this state.
    pub fn has_session(&self) -> bool {
        matches!(
            self,
            SessionState::Negotiating | SessionState::Live | SessionState::Restarting
        )
    }

    pub fn can_start(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Stopped | SessionState::Failed
        )
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, SessionState::Ended)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Raised once when the session reaches `Ended`, so the embedding application
/// can redirect or close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownRequest {
    pub reason: Option<String>,
    pub forced: bool,
}

/// Point-in-time view of a publisher.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// Incremented for every negotiated session; 0 before the first start.
    pub generation: u64,
    pub negotiations: u64,
    pub ice_restarts: u64,
    pub resource_url: Option<String>,
    pub video_track: Option<String>,
    pub audio_track: Option<String>,
    /// Sanitized text of the last failure.
    pub last_error: Option<String>,
    /// Findings of the SDP transform for the current session's last offer.
    pub sdp_warnings: Vec<SdpWarning>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(SessionState::Idle.status(), StreamStatus::Ready);
        assert_eq!(SessionState::Negotiating.status(), StreamStatus::Starting);
        assert_eq!(SessionState::Live.status(), StreamStatus::Streaming);
        assert_eq!(SessionState::Restarting.status(), StreamStatus::Starting);
        assert_eq!(SessionState::Stopping.status(), StreamStatus::Stopping);
        assert_eq!(SessionState::Stopped.status(), StreamStatus::Stopped);
        assert_eq!(SessionState::Failed.status(), StreamStatus::Error);
        assert_eq!(SessionState::ended_status(false), StreamStatus::Ended);
        assert_eq!(SessionState::ended_status(true), StreamStatus::SessionEnded);
    }

    #[test]
    fn test_restartable_states() {
        assert!(SessionState::Idle.can_start());
        assert!(SessionState::Stopped.can_start());
        assert!(SessionState::Failed.can_start());
        assert!(!SessionState::Live.can_start());
        assert!(!SessionState::Ended.can_start());
    }
}
