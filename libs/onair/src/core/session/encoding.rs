// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Keeps the live video sender's encoding layer equal to the profile.

use crate::core::error::Result;
use crate::core::media::MediaKind;
use crate::core::peer::PeerConnection;
use crate::core::profile::{EncodingParameters, EncodingProfile};

pub struct EncodingController {
    profile: EncodingProfile,
}

impl EncodingController {
    pub fn new(profile: EncodingProfile) -> Self {
        Self { profile }
    }

    /// Picked up by the next [`enforce`](Self::enforce).
    pub fn set_profile(&mut self, profile: EncodingProfile) {
        self.profile = profile;
    }

    pub fn target(&self) -> EncodingParameters {
        EncodingParameters::from_profile(&self.profile)
    }

    /// Set the video sender to the single target layer. No-op without a sender.
    pub async fn apply_now(&self, pc: &dyn PeerConnection) -> Result<()> {
        if !pc.has_sender(MediaKind::Video) {
            return Ok(());
        }
        let target = self.target();
        pc.set_sender_parameters(MediaKind::Video, target).await?;
        tracing::debug!(
            "[EncodingController] Applied {} bps @ {} fps",
            target.max_bitrate_bps,
            target.max_framerate
        );
        Ok(())
    }

    /// Re-apply when the sender drifted from the target. Returns whether it did.
    pub async fn enforce(&self, pc: &dyn PeerConnection) -> Result<bool> {
        if !pc.has_sender(MediaKind::Video) {
            return Ok(false);
        }

        let target = self.target();
        let current = pc.sender_parameters(MediaKind::Video).await;
        let drifted = match current {
            Some(params) => {
                params.max_bitrate_bps != target.max_bitrate_bps
                    || params.max_framerate != target.max_framerate
            }
            None => true,
        };
        if !drifted {
            return Ok(false);
        }

        tracing::info!(
            "[EncodingController] Sender drifted ({:?} bps), re-applying {} bps",
            current.map(|p| p.max_bitrate_bps),
            target.max_bitrate_bps
        );
        pc.set_sender_parameters(MediaKind::Video, target).await?;
        Ok(true)
    }
}
