// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Encoding profile and the sender-side encoding layer derived from it.

use serde::{Deserialize, Serialize};

use super::error::{PublishError, Result};

/// Upper bound accepted for `max_bitrate_kbps` (100 Mbps).
pub const MAX_BITRATE_KBPS: u32 = 100_000;
/// Upper bound accepted for `max_framerate`.
pub const MAX_FRAMERATE: u32 = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    VP8,
    VP9,
    AV1,
}

impl VideoCodec {
    pub const ALL: [VideoCodec; 4] = [
        VideoCodec::H264,
        VideoCodec::VP8,
        VideoCodec::VP9,
        VideoCodec::AV1,
    ];

    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/H264",
            VideoCodec::VP8 => "video/VP8",
            VideoCodec::VP9 => "video/VP9",
            VideoCodec::AV1 => "video/AV1",
        }
    }

    /// Encoding name as it appears in `a=rtpmap` (compare case-insensitively).
    pub fn rtpmap_name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "H264",
            VideoCodec::VP8 => "VP8",
            VideoCodec::VP9 => "VP9",
            VideoCodec::AV1 => "AV1",
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.rtpmap_name())
    }
}

impl std::str::FromStr for VideoCodec {
    type Err = PublishError;

    fn from_str(s: &str) -> Result<Self> {
        VideoCodec::ALL
            .into_iter()
            .find(|codec| codec.rtpmap_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| PublishError::InvalidProfile(format!("Unknown video codec '{}'", s)))
    }
}

/// Target encoding settings for a publishing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingProfile {
    pub video_codec: VideoCodec,
    pub max_bitrate_kbps: u32,
    pub max_framerate: u32,
    /// Stereo, full-band Opus (suppressed when the offer carries DTX).
    pub studio_sound: bool,
}

impl Default for EncodingProfile {
    fn default() -> Self {
        Self {
            video_codec: VideoCodec::H264,
            max_bitrate_kbps: 2500,
            max_framerate: 30,
            studio_sound: false,
        }
    }
}

impl EncodingProfile {
    pub fn validate(&self) -> Result<()> {
        if self.max_bitrate_kbps == 0 || self.max_bitrate_kbps > MAX_BITRATE_KBPS {
            return Err(PublishError::InvalidProfile(format!(
                "max_bitrate_kbps must be in 1..={}, got {}",
                MAX_BITRATE_KBPS, self.max_bitrate_kbps
            )));
        }
        if self.max_framerate == 0 || self.max_framerate > MAX_FRAMERATE {
            return Err(PublishError::InvalidProfile(format!(
                "max_framerate must be in 1..={}, got {}",
                MAX_FRAMERATE, self.max_framerate
            )));
        }
        Ok(())
    }

    pub fn max_bitrate_bps(&self) -> u64 {
        u64::from(self.max_bitrate_kbps) * 1000
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    VeryLow,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegradationPreference {
    MaintainFramerate,
    MaintainResolution,
    Balanced,
}

/// One sender encoding layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncodingParameters {
    pub max_bitrate_bps: u64,
    pub max_framerate: u32,
    pub scale_resolution_down_by: f64,
    pub active: bool,
    pub priority: Priority,
    pub degradation_preference: DegradationPreference,
}

impl EncodingParameters {
    pub fn from_profile(profile: &EncodingProfile) -> Self {
        Self {
            max_bitrate_bps: profile.max_bitrate_bps(),
            max_framerate: profile.max_framerate,
            scale_resolution_down_by: 1.0,
            active: true,
            priority: Priority::High,
            degradation_preference: DegradationPreference::MaintainFramerate,
        }
    }
}
