// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Publisher configuration via `onair.yaml`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::error::{PublishError, Result};
use super::logging::LoggingConfig;
use super::profile::EncodingProfile;
use super::session::{PublishEndpoint, SessionSettings, StreamIdentity};
use super::whip::WhipConfig;

/// Stream identity handed out by the room allocator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub room: String,
    pub stream_id: String,
}

/// Session timing knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ice_gathering_timeout_ms: u64,
    pub enforcement_interval_ms: u64,
    pub mailbox_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let defaults = SessionSettings::default();
        Self {
            ice_gathering_timeout_ms: defaults.ice_gathering_timeout.as_millis() as u64,
            enforcement_interval_ms: defaults.enforcement_interval.as_millis() as u64,
            mailbox_capacity: defaults.mailbox_capacity,
        }
    }
}

impl SessionConfig {
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            ice_gathering_timeout: Duration::from_millis(self.ice_gathering_timeout_ms),
            enforcement_interval: Duration::from_millis(self.enforcement_interval_ms),
            mailbox_capacity: self.mailbox_capacity,
        }
    }
}

/// Top-level configuration from `onair.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnAirConfig {
    pub stream: StreamConfig,
    pub whip: WhipConfig,
    pub encoding: EncodingProfile,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

impl OnAirConfig {
    /// Configuration file name.
    pub const FILE_NAME: &'static str = "onair.yaml";

    /// Load configuration from a YAML file. Errors if the file is missing or
    /// cannot be parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PublishError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            PublishError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        tracing::info!("Loaded publisher config from {}", path.display());
        Ok(config)
    }

    /// Load `onair.yaml` from a directory, returning defaults if the file is
    /// missing or unparseable.
    pub fn load_or_default(dir: &Path) -> Self {
        let config_path = dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            tracing::debug!(
                "No {} found in {}, using defaults",
                Self::FILE_NAME,
                dir.display()
            );
            return Self::default();
        }

        match Self::load(&config_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream.room.trim().is_empty() {
            return Err(PublishError::Configuration("stream.room is empty".into()));
        }
        if self.stream.stream_id.trim().is_empty() {
            return Err(PublishError::Configuration("stream.stream_id is empty".into()));
        }
        if self.whip.endpoint_url.trim().is_empty() {
            return Err(PublishError::Configuration("whip.endpoint_url is empty".into()));
        }
        if !self.whip.endpoint_url.starts_with("http://")
            && !self.whip.endpoint_url.starts_with("https://")
        {
            return Err(PublishError::Configuration(format!(
                "whip.endpoint_url must be http(s), got '{}'",
                self.whip.endpoint_url
            )));
        }
        if self.session.mailbox_capacity == 0 {
            return Err(PublishError::Configuration(
                "session.mailbox_capacity must be at least 1".into(),
            ));
        }
        if self.session.enforcement_interval_ms == 0 {
            return Err(PublishError::Configuration(
                "session.enforcement_interval_ms must be at least 1".into(),
            ));
        }
        self.encoding.validate()
    }

    pub fn identity(&self) -> StreamIdentity {
        StreamIdentity::new(&self.stream.room, &self.stream.stream_id)
    }

    pub fn endpoint(&self) -> PublishEndpoint {
        PublishEndpoint::new(&self.whip.endpoint_url)
    }
}
