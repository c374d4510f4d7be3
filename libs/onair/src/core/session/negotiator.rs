// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Offer/answer exchange against a WHIP endpoint.

use std::time::Duration;

use crate::core::error::{IceError, Result};
use crate::core::media::SessionTracks;
use crate::core::peer::{OfferOptions, PeerConnection};
use crate::core::profile::EncodingProfile;
use crate::core::sdp::{munge_offer, SdpWarning};
use crate::core::whip::WhipClient;

/// Outcome of a successful negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub resource_url: Option<String>,
    pub warnings: Vec<SdpWarning>,
}

pub struct Negotiator {
    whip: WhipClient,
    ice_gathering_timeout: Duration,
}

impl Negotiator {
    pub fn new(whip: WhipClient, ice_gathering_timeout: Duration) -> Self {
        Self {
            whip,
            ice_gathering_timeout,
        }
    }

    /// Attach tracks, pin the codec preference, then run the offer/answer
    /// exchange. The caller owns `pc` and closes it on failure.
    pub async fn publish(
        &self,
        pc: &dyn PeerConnection,
        tracks: &SessionTracks,
        profile: &EncodingProfile,
    ) -> Result<Negotiated> {
        for track in tracks.iter() {
            tracing::debug!(
                "[Negotiator] Adding {} track '{}' (sendonly)",
                track.kind(),
                track.id()
            );
            pc.add_track(track.clone()).await?;
        }

        if tracks.video().is_some()
            && !pc.set_video_codec_preference(profile.video_codec).await?
        {
            tracing::warn!(
                "[Negotiator] {} not supported by the media stack, keeping default codec order",
                profile.video_codec
            );
        }

        self.renegotiate(pc, profile, false).await
    }

    /// Offer, local description, bounded gathering, POST, remote answer.
    pub async fn renegotiate(
        &self,
        pc: &dyn PeerConnection,
        profile: &EncodingProfile,
        ice_restart: bool,
    ) -> Result<Negotiated> {
        let offer = pc.create_offer(OfferOptions { ice_restart }).await?;
        let munged = munge_offer(&offer, profile);
        for warning in &munged.warnings {
            tracing::debug!("[Negotiator] SDP warning: {}", warning);
        }
        pc.set_local_description(munged.sdp.clone()).await?;

        match tokio::time::timeout(self.ice_gathering_timeout, pc.gathering_complete()).await {
            Ok(()) => tracing::debug!("[Negotiator] ICE gathering complete"),
            Err(_) => {
                let err = IceError::GatheringTimeout(self.ice_gathering_timeout);
                tracing::warn!("[Negotiator] {}, posting partial candidates", err);
            }
        }

        // Candidates are now embedded; the transform is idempotent.
        let local = pc.local_description().await.unwrap_or(munged.sdp);
        let final_offer = munge_offer(&local, profile);

        tracing::info!(
            "[Negotiator] Posting offer to {} (ice_restart={})",
            self.whip.endpoint_url(),
            ice_restart
        );
        for (i, line) in final_offer.sdp.lines().enumerate() {
            tracing::trace!("[Negotiator] OFFER [{}]: {}", i, line);
        }

        let answer = self.whip.post_offer(&final_offer.sdp).await?;
        for (i, line) in answer.sdp.lines().enumerate() {
            tracing::trace!("[Negotiator] ANSWER [{}]: {}", i, line);
        }

        pc.set_remote_answer(answer.sdp).await?;

        Ok(Negotiated {
            resource_url: answer.resource_url,
            warnings: final_offer.warnings,
        })
    }

    /// Best-effort DELETE of the WHIP resource. Failures are logged only.
    pub async fn terminate(&self, resource_url: &str) {
        if let Err(e) = self.whip.delete_resource(resource_url).await {
            tracing::warn!(
                "[Negotiator] Failed to delete WHIP resource {}: {}",
                resource_url,
                e
            );
        }
    }
}
