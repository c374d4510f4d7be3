// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("WHIP endpoint rejected offer (HTTP {0})")]
    Rejected(u16),

    #[error("No active session")]
    NoActiveSession,

    #[error("Invalid encoding profile: {0}")]
    InvalidProfile(String),

    #[error("Invalid track: {0}")]
    InvalidTrack(String),

    #[error("No media tracks available")]
    DevicesNotReady,

    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error(transparent)]
    Ice(#[from] IceError),

    #[error("Session has ended")]
    SessionEnded,

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IceError {
    /// Non-fatal: negotiation proceeds with whatever candidates were gathered.
    #[error("ICE gathering did not complete within {0:?}")]
    GatheringTimeout(Duration),

    #[error("ICE restart failed: {0}")]
    RestartFailed(String),
}

/// Failure reported by a platform adapter.
#[derive(Error, Debug, Clone)]
#[error("{operation} failed: {message}")]
pub struct PeerError {
    pub operation: &'static str,
    pub message: String,
}

impl PeerError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

impl From<PeerError> for PublishError {
    fn from(err: PeerError) -> Self {
        PublishError::Negotiation(err.to_string())
    }
}

impl PublishError {
    /// Sanitized text for the control plane. Raw error detail stays in the logs.
    pub fn user_message(&self) -> String {
        match self {
            PublishError::Network(_) => "Could not reach the ingest server".to_string(),
            PublishError::Rejected(status) => {
                format!("Ingest server rejected the stream (HTTP {})", status)
            }
            PublishError::NoActiveSession => "No active stream".to_string(),
            PublishError::InvalidProfile(_) => "Invalid encoding settings".to_string(),
            PublishError::InvalidTrack(_) => "Invalid media track".to_string(),
            PublishError::DevicesNotReady => "Camera and microphone are not ready".to_string(),
            PublishError::Negotiation(_) => "Failed to set up the media connection".to_string(),
            PublishError::Ice(IceError::GatheringTimeout(_)) => {
                "Network discovery timed out".to_string()
            }
            PublishError::Ice(IceError::RestartFailed(_)) => {
                "Connection lost and could not be recovered".to_string()
            }
            PublishError::SessionEnded => "Session has ended".to_string(),
            PublishError::Configuration(_) => "Publisher is misconfigured".to_string(),
            PublishError::Internal(_) => "Internal publisher error".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PublishError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hides_raw_detail() {
        let err = PublishError::Network("dns error: failed to lookup ingest.internal:443".into());
        let message = err.user_message();
        assert!(!message.contains("ingest.internal"));
        assert_eq!(message, "Could not reach the ingest server");
    }

    #[test]
    fn test_rejected_message_carries_status() {
        assert_eq!(
            PublishError::Rejected(403).user_message(),
            "Ingest server rejected the stream (HTTP 403)"
        );
    }

    #[test]
    fn test_peer_error_maps_to_negotiation() {
        let err: PublishError = PeerError::new("set_local_description", "bad sdp").into();
        match err {
            PublishError::Negotiation(msg) => {
                assert_eq!(msg, "set_local_description failed: bad sdp")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
