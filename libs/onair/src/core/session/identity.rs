// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::{Deserialize, Serialize};

/// Fully-resolved stream identity. Allocated outside the engine and never
/// generated or mutated by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamIdentity {
    pub room: String,
    pub stream_id: String,
}

impl StreamIdentity {
    pub fn new(room: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            stream_id: stream_id.into(),
        }
    }
}

impl std::fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.room, self.stream_id)
    }
}

/// WHIP endpoint URL, immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublishEndpoint(String);

impl PublishEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `(room, participant)` from a `.../{room}/{participant}/whip` URL.
    ///
    /// Informational only; the session identity always comes from the caller.
    pub fn identity_hint(&self) -> Option<(String, String)> {
        let path = self
            .0
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.0);
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let segments: Vec<&str> = path
            .split('/')
            .skip(1)
            .filter(|s| !s.is_empty())
            .collect();

        match segments.as_slice() {
            [.., room, participant, last] if last.eq_ignore_ascii_case("whip") => {
                Some((room.to_string(), participant.to_string()))
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for PublishEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
