// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// Codec table registered with the media engine.
//
// Payload types match what browsers commonly offer so munged offers read the
// same as a Chrome publisher's.

use webrtc::api::media_engine::{
    MIME_TYPE_AV1, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_VP8, MIME_TYPE_VP9,
};
use webrtc::rtp_transceiver::RTCPFeedback;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters};

use crate::core::profile::VideoCodec;

pub(crate) const H264_FMTP: &str =
    "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";
pub(crate) const OPUS_FMTP: &str = "minptime=10;useinbandfec=1";

fn video_feedback() -> Vec<RTCPFeedback> {
    [
        ("goog-remb", ""),
        ("ccm", "fir"),
        ("nack", ""),
        ("nack", "pli"),
        ("transport-cc", ""),
    ]
    .into_iter()
    .map(|(typ, parameter)| RTCPFeedback {
        typ: typ.to_owned(),
        parameter: parameter.to_owned(),
    })
    .collect()
}

pub(crate) fn video_capability(codec: VideoCodec) -> RTCRtpCodecCapability {
    let (mime_type, sdp_fmtp_line) = match codec {
        VideoCodec::H264 => (MIME_TYPE_H264, H264_FMTP),
        VideoCodec::VP8 => (MIME_TYPE_VP8, ""),
        VideoCodec::VP9 => (MIME_TYPE_VP9, "profile-id=0"),
        VideoCodec::AV1 => (MIME_TYPE_AV1, ""),
    };
    RTCRtpCodecCapability {
        mime_type: mime_type.to_owned(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: sdp_fmtp_line.to_owned(),
        rtcp_feedback: video_feedback(),
    }
}

pub(crate) fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_owned(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: OPUS_FMTP.to_owned(),
        rtcp_feedback: vec![],
    }
}

fn video_payload_type(codec: VideoCodec) -> u8 {
    match codec {
        VideoCodec::H264 => 102,
        VideoCodec::VP8 => 96,
        VideoCodec::VP9 => 98,
        VideoCodec::AV1 => 41,
    }
}

/// Registered video codecs in default preference order.
pub(crate) fn video_codecs() -> Vec<(VideoCodec, RTCRtpCodecParameters)> {
    VideoCodec::ALL
        .iter()
        .map(|&codec| {
            (
                codec,
                RTCRtpCodecParameters {
                    capability: video_capability(codec),
                    payload_type: video_payload_type(codec),
                    ..Default::default()
                },
            )
        })
        .collect()
}

pub(crate) fn opus_codec() -> RTCRtpCodecParameters {
    RTCRtpCodecParameters {
        capability: opus_capability(),
        payload_type: 111,
        ..Default::default()
    }
}

/// `[preferred, ...rest]`, or `None` when `preferred` is not registered.
pub(crate) fn preference_order(
    codecs: &[(VideoCodec, RTCRtpCodecParameters)],
    preferred: VideoCodec,
) -> Option<Vec<RTCRtpCodecParameters>> {
    let first = codecs.iter().find(|(codec, _)| *codec == preferred)?;
    let mut ordered = vec![first.1.clone()];
    ordered.extend(
        codecs
            .iter()
            .filter(|(codec, _)| *codec != preferred)
            .map(|(_, params)| params.clone()),
    );
    Some(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preference_puts_codec_first() {
        let codecs = video_codecs();
        let ordered = preference_order(&codecs, VideoCodec::VP9).unwrap();
        assert_eq!(ordered.len(), codecs.len());
        assert_eq!(ordered[0].capability.mime_type, MIME_TYPE_VP9);
        assert_eq!(ordered[0].payload_type, 98);
        assert_eq!(ordered[1].capability.mime_type, MIME_TYPE_H264);
    }

    #[test]
    fn test_preference_for_unregistered_codec() {
        let codecs: Vec<_> = video_codecs()
            .into_iter()
            .filter(|(codec, _)| *codec != VideoCodec::AV1)
            .collect();
        assert!(preference_order(&codecs, VideoCodec::AV1).is_none());
    }

    #[test]
    fn test_video_feedback_includes_remb() {
        let capability = video_capability(VideoCodec::H264);
        assert!(capability.rtcp_feedback.iter().any(|fb| fb.typ == "goog-remb"));
        assert!(
            capability
                .rtcp_feedback
                .iter()
                .any(|fb| fb.typ == "nack" && fb.parameter == "pli")
        );
    }
}
