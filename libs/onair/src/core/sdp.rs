// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! SDP offer rewriting for WHIP publishing.
//!
//! [`munge_offer`] is a pure, deterministic transformation: feeding its output
//! back in with the same profile yields the same SDP. The negotiator relies on
//! that to re-run it on the gathered local description before the POST.

use super::media::MediaKind;
use super::profile::{EncodingProfile, VideoCodec};

const CRLF: &str = "\r\n";

/// RTCP feedback mechanisms advertised for the preferred video payload type.
const VIDEO_FEEDBACK: [&str; 5] = ["transport-cc", "nack", "nack pli", "ccm fir", "goog-remb"];

const OPUS_RTPMAP: &str = "opus/48000/2";
const OPUS_STUDIO_MAX_AVERAGE_BITRATE: &str = "510000";

/// Non-fatal findings from [`munge_offer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpWarning {
    /// The preferred codec has no payload type in the video section; the media
    /// stack will fall back to its default codec.
    CodecNotOffered(VideoCodec),
    /// Studio sound was requested but the Opus payload uses DTX, so stereo was
    /// not forced.
    StereoSuppressedByDtx,
}

impl std::fmt::Display for SdpWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SdpWarning::CodecNotOffered(codec) => {
                write!(f, "preferred codec {} not offered, using stack default", codec)
            }
            SdpWarning::StereoSuppressedByDtx => {
                f.write_str("studio sound requested but DTX is enabled, stereo not forced")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MungedSdp {
    pub sdp: String,
    pub warnings: Vec<SdpWarning>,
}

/// Rewrite an SDP offer for a send-only WHIP publisher using `profile`.
pub fn munge_offer(sdp: &str, profile: &EncodingProfile) -> MungedSdp {
    let mut warnings = Vec::new();
    let (session, sections) = split_sections(sdp);

    let mut out: Vec<String> = session.into_iter().map(force_sendonly).collect();

    for mut section in sections {
        section = section.into_iter().map(force_sendonly).collect();
        match section_media(&section) {
            Some("video") => munge_video_section(&mut section, profile, &mut warnings),
            Some("audio") => munge_audio_section(&mut section, profile, &mut warnings),
            _ => {}
        }
        out.extend(section);
    }

    let mut sdp = out.join(CRLF);
    sdp.push_str(CRLF);
    MungedSdp { sdp, warnings }
}

/// Count `a=<attr>` / `a=<attr>:...` lines across the whole SDP.
pub fn count_attribute(sdp: &str, attr: &str) -> usize {
    let bare = format!("a={}", attr);
    let with_value = format!("a={}:", attr);
    sdp.lines()
        .map(str::trim)
        .filter(|line| *line == bare || line.starts_with(&with_value))
        .count()
}

/// Payload type of `codec_name` in the first `m=<media>` section.
///
/// `codec_name` is either an encoding name (`"H264"`) or a full rtpmap
/// encoding (`"opus/48000/2"`); both compare case-insensitively.
pub fn payload_type_for(sdp: &str, media: MediaKind, codec_name: &str) -> Option<u8> {
    let (_, sections) = split_sections(sdp);
    sections
        .iter()
        .find(|section| section_media(section) == Some(media.as_str()))
        .and_then(|section| find_payload_type(section, codec_name))
}

fn force_sendonly(line: String) -> String {
    if line == "a=sendrecv" {
        "a=sendonly".to_string()
    } else {
        line
    }
}

/// Split into session-level lines and one line list per `m=` section.
fn split_sections(sdp: &str) -> (Vec<String>, Vec<Vec<String>>) {
    let mut session = Vec::new();
    let mut sections: Vec<Vec<String>> = Vec::new();

    for line in sdp.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
        if line.starts_with("m=") {
            sections.push(vec![line.to_string()]);
        } else if let Some(current) = sections.last_mut() {
            current.push(line.to_string());
        } else {
            session.push(line.to_string());
        }
    }

    (session, sections)
}

fn section_media(section: &[String]) -> Option<&str> {
    section
        .first()
        .and_then(|m| m.strip_prefix("m="))
        .and_then(|rest| rest.split(' ').next())
}

fn find_payload_type(section: &[String], codec_name: &str) -> Option<u8> {
    let full_match = codec_name.contains('/');
    section.iter().find_map(|line| {
        let rest = line.strip_prefix("a=rtpmap:")?;
        let (pt, encoding) = rest.split_once(' ')?;
        let encoding = encoding.trim();
        let matches = if full_match {
            encoding.eq_ignore_ascii_case(codec_name)
        } else {
            encoding
                .split('/')
                .next()
                .is_some_and(|name| name.eq_ignore_ascii_case(codec_name))
        };
        if matches { pt.trim().parse().ok() } else { None }
    })
}

fn munge_video_section(
    section: &mut Vec<String>,
    profile: &EncodingProfile,
    warnings: &mut Vec<SdpWarning>,
) {
    let kbps = profile.max_bitrate_kbps;

    section.retain(|line| !line.starts_with("b=AS:") && !line.starts_with("b=TIAS:"));
    let bandwidth_at = section
        .iter()
        .position(|line| line.starts_with("c="))
        .map(|i| i + 1)
        .unwrap_or(1);
    section.insert(bandwidth_at, format!("b=AS:{}", kbps));
    section.insert(bandwidth_at + 1, format!("b=TIAS:{}", u64::from(kbps) * 1000));

    let codec = profile.video_codec;
    let Some(pt) = find_payload_type(section, codec.rtpmap_name()) else {
        tracing::warn!(
            "[SdpTransform] Preferred codec {} not offered, negotiation falls back to the stack default",
            codec
        );
        warnings.push(SdpWarning::CodecNotOffered(codec));
        return;
    };

    let mut params = codec_fmtp(codec, profile.max_framerate);
    params.extend([
        ("x-google-max-bitrate".to_string(), kbps.to_string()),
        ("x-google-min-bitrate".to_string(), (kbps / 2).to_string()),
        ("x-google-start-bitrate".to_string(), (kbps * 3 / 4).to_string()),
    ]);
    update_fmtp(section, pt, |fmtp| {
        for (key, value) in &params {
            fmtp.set(key, value);
        }
    });

    let missing: Vec<String> = VIDEO_FEEDBACK
        .iter()
        .map(|fb| format!("a=rtcp-fb:{} {}", pt, fb))
        .filter(|line| !section.contains(line))
        .collect();
    if !missing.is_empty() {
        let anchor = last_payload_line(section, pt).map(|i| i + 1).unwrap_or(section.len());
        for (offset, line) in missing.into_iter().enumerate() {
            section.insert(anchor + offset, line);
        }
    }

    tracing::debug!(
        "[SdpTransform] Video PT {} tuned for {} @ {} kbps / {} fps",
        pt,
        codec,
        kbps,
        profile.max_framerate
    );
}

fn munge_audio_section(
    section: &mut Vec<String>,
    profile: &EncodingProfile,
    warnings: &mut Vec<SdpWarning>,
) {
    let Some(pt) = find_payload_type(section, OPUS_RTPMAP) else {
        return;
    };

    let has_dtx = fmtp_index(section, pt)
        .map(|i| FmtpParams::parse(fmtp_value(&section[i], pt)).get("usedtx") == Some("1"))
        .unwrap_or(false);
    let force_stereo = profile.studio_sound && !has_dtx;
    if profile.studio_sound && has_dtx {
        tracing::warn!("[SdpTransform] Opus DTX is enabled, not forcing stereo");
        warnings.push(SdpWarning::StereoSuppressedByDtx);
    }

    if fmtp_index(section, pt).is_none() && !force_stereo {
        return;
    }

    update_fmtp(section, pt, |fmtp| {
        fmtp.remove("stereo");
        fmtp.remove("sprop-stereo");
        if force_stereo {
            fmtp.remove("maxaveragebitrate");
            fmtp.set("stereo", "1");
            fmtp.set("sprop-stereo", "1");
            fmtp.set("maxaveragebitrate", OPUS_STUDIO_MAX_AVERAGE_BITRATE);
        }
    });
}

fn codec_fmtp(codec: VideoCodec, max_framerate: u32) -> Vec<(String, String)> {
    let pairs: Vec<(&str, String)> = match codec {
        VideoCodec::H264 => vec![
            ("level-asymmetry-allowed", "1".into()),
            ("packetization-mode", "1".into()),
            ("profile-level-id", "42e01f".into()),
        ],
        VideoCodec::VP8 => vec![
            ("max-fs", "8160".into()),
            ("max-fr", max_framerate.to_string()),
        ],
        VideoCodec::VP9 => vec![
            ("profile-id", "0".into()),
            ("max-fs", "8160".into()),
            ("max-fr", max_framerate.to_string()),
        ],
        VideoCodec::AV1 => vec![
            ("profile", "0".into()),
            ("level-idx", "8".into()),
            ("tier", "0".into()),
        ],
    };
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn fmtp_prefix(pt: u8) -> String {
    format!("a=fmtp:{} ", pt)
}

fn fmtp_index(section: &[String], pt: u8) -> Option<usize> {
    let prefix = fmtp_prefix(pt);
    section.iter().position(|line| line.starts_with(&prefix))
}

fn fmtp_value(line: &str, pt: u8) -> &str {
    line.strip_prefix(&fmtp_prefix(pt)).unwrap_or_default()
}

/// Edit (or create right after the rtpmap line) the `a=fmtp:<pt>` line.
/// An fmtp left without parameters is removed.
fn update_fmtp(section: &mut Vec<String>, pt: u8, edit: impl FnOnce(&mut FmtpParams)) {
    let existing = fmtp_index(section, pt);
    let mut params = existing
        .map(|i| FmtpParams::parse(fmtp_value(&section[i], pt)))
        .unwrap_or_default();

    edit(&mut params);

    let line = format!("{}{}", fmtp_prefix(pt), params);
    match existing {
        Some(i) if params.is_empty() => {
            section.remove(i);
        }
        Some(i) => section[i] = line,
        None if params.is_empty() => {}
        None => {
            let rtpmap = format!("a=rtpmap:{} ", pt);
            let at = section
                .iter()
                .position(|l| l.starts_with(&rtpmap))
                .map(|i| i + 1)
                .unwrap_or(section.len());
            section.insert(at, line);
        }
    }
}

fn last_payload_line(section: &[String], pt: u8) -> Option<usize> {
    let prefixes = [
        format!("a=rtpmap:{} ", pt),
        format!("a=fmtp:{} ", pt),
        format!("a=rtcp-fb:{} ", pt),
    ];
    section
        .iter()
        .rposition(|line| prefixes.iter().any(|p| line.starts_with(p)))
}

/// Ordered `key=value` list of an fmtp line. Bare tokens (e.g. `0-15`) are kept.
#[derive(Debug, Default)]
struct FmtpParams(Vec<(String, Option<String>)>);

impl FmtpParams {
    fn parse(value: &str) -> Self {
        Self(
            value
                .split(';')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| match p.split_once('=') {
                    Some((k, v)) => (k.trim().to_string(), Some(v.trim().to_string())),
                    None => (p.to_string(), None),
                })
                .collect(),
        )
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, v)| v.as_deref())
    }

    fn set(&mut self, key: &str, value: &str) {
        match self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            Some(entry) => entry.1 = Some(value.to_string()),
            None => self.0.push((key.to_string(), Some(value.to_string()))),
        }
    }

    fn remove(&mut self, key: &str) {
        self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for FmtpParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            match value {
                Some(v) => write!(f, "{}={}", key, v)?,
                None => f.write_str(key)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHROME_OFFER: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111 0\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=sendrecv\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10;useinbandfec=1;stereo=1\r\n\
a=rtpmap:0 PCMU/8000\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97 98\r\n\
c=IN IP4 0.0.0.0\r\n\
b=AS:500\r\n\
a=mid:1\r\n\
a=sendrecv\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtcp-fb:96 nack\r\n\
a=rtpmap:97 h264/90000\r\n\
a=fmtp:97 packetization-mode=1;profile-level-id=640c1f\r\n\
a=rtpmap:98 AV1/90000\r\n";

    fn profile(codec: VideoCodec, kbps: u32) -> EncodingProfile {
        EncodingProfile {
            video_codec: codec,
            max_bitrate_kbps: kbps,
            max_framerate: 30,
            studio_sound: false,
        }
    }

    fn lines(sdp: &str) -> Vec<&str> {
        sdp.split("\r\n").collect()
    }

    #[test]
    fn test_sendrecv_is_rewritten() {
        let out = munge_offer(CHROME_OFFER, &EncodingProfile::default());
        assert_eq!(count_attribute(&out.sdp, "sendrecv"), 0);
        assert_eq!(count_attribute(&out.sdp, "sendonly"), 2);
    }

    #[test]
    fn test_bandwidth_follows_video_connection_line() {
        let out = munge_offer(CHROME_OFFER, &profile(VideoCodec::H264, 3000));
        let lines = lines(&out.sdp);
        let m_video = lines.iter().position(|l| l.starts_with("m=video")).unwrap();
        assert_eq!(lines[m_video + 1], "c=IN IP4 0.0.0.0");
        assert_eq!(lines[m_video + 2], "b=AS:3000");
        assert_eq!(lines[m_video + 3], "b=TIAS:3000000");
        assert!(!out.sdp.contains("b=AS:500"));
    }

    #[test]
    fn test_h264_fmtp_and_feedback() {
        let out = munge_offer(CHROME_OFFER, &profile(VideoCodec::H264, 3000));
        assert!(out.warnings.is_empty());
        assert!(out.sdp.contains(
            "a=fmtp:97 packetization-mode=1;profile-level-id=42e01f;level-asymmetry-allowed=1;\
x-google-max-bitrate=3000;x-google-min-bitrate=1500;x-google-start-bitrate=2250\r\n"
        ));
        for fb in VIDEO_FEEDBACK {
            assert!(out.sdp.contains(&format!("a=rtcp-fb:97 {}\r\n", fb)), "missing {fb}");
        }
        // VP8 feedback is left alone
        assert!(!out.sdp.contains("a=rtcp-fb:96 transport-cc"));
    }

    #[test]
    fn test_fmtp_created_after_rtpmap_when_absent() {
        let out = munge_offer(CHROME_OFFER, &profile(VideoCodec::VP8, 2000));
        let lines = lines(&out.sdp);
        let rtpmap = lines.iter().position(|l| *l == "a=rtpmap:96 VP8/90000").unwrap();
        assert_eq!(
            lines[rtpmap + 1],
            "a=fmtp:96 max-fs=8160;max-fr=30;x-google-max-bitrate=2000;\
x-google-min-bitrate=1000;x-google-start-bitrate=1500"
        );
        // pre-existing nack is not duplicated
        assert_eq!(
            lines.iter().filter(|l| **l == "a=rtcp-fb:96 nack").count(),
            1
        );
        assert!(out.sdp.contains("a=rtcp-fb:96 goog-remb\r\n"));
    }

    #[test]
    fn test_av1_parameters() {
        let out = munge_offer(CHROME_OFFER, &profile(VideoCodec::AV1, 4000));
        assert!(out.sdp.contains("a=fmtp:98 profile=0;level-idx=8;tier=0;"));
    }

    #[test]
    fn test_missing_codec_is_a_warning() {
        let out = munge_offer(CHROME_OFFER, &profile(VideoCodec::VP9, 2500));
        assert_eq!(out.warnings, vec![SdpWarning::CodecNotOffered(VideoCodec::VP9)]);
        assert!(out.sdp.contains("b=AS:2500\r\n"));
        assert!(!out.sdp.contains("x-google"));
    }

    #[test]
    fn test_mono_default_strips_stereo() {
        let out = munge_offer(CHROME_OFFER, &EncodingProfile::default());
        assert!(out.sdp.contains("a=fmtp:111 minptime=10;useinbandfec=1\r\n"));
    }

    #[test]
    fn test_studio_sound_forces_stereo() {
        let studio = EncodingProfile {
            studio_sound: true,
            ..Default::default()
        };
        let out = munge_offer(CHROME_OFFER, &studio);
        assert!(out.sdp.contains(
            "a=fmtp:111 minptime=10;useinbandfec=1;stereo=1;sprop-stereo=1;maxaveragebitrate=510000\r\n"
        ));
    }

    #[test]
    fn test_dtx_suppresses_stereo() {
        let offer = CHROME_OFFER.replace(
            "a=fmtp:111 minptime=10;useinbandfec=1;stereo=1",
            "a=fmtp:111 minptime=10;usedtx=1;sprop-stereo=1",
        );
        let studio = EncodingProfile {
            studio_sound: true,
            ..Default::default()
        };
        let out = munge_offer(&offer, &studio);
        assert!(out.sdp.contains("a=fmtp:111 minptime=10;usedtx=1\r\n"));
        assert!(out.warnings.contains(&SdpWarning::StereoSuppressedByDtx));
    }

    #[test]
    fn test_munge_is_idempotent() {
        for codec in VideoCodec::ALL {
            for studio_sound in [false, true] {
                let p = EncodingProfile {
                    video_codec: codec,
                    max_bitrate_kbps: 1800,
                    max_framerate: 24,
                    studio_sound,
                };
                let once = munge_offer(CHROME_OFFER, &p);
                let twice = munge_offer(&once.sdp, &p);
                assert_eq!(once.sdp, twice.sdp, "not idempotent for {codec} studio={studio_sound}");
            }
        }
    }

    #[test]
    fn test_lf_input_gets_crlf_output() {
        let lf = CHROME_OFFER.replace("\r\n", "\n");
        let out = munge_offer(&lf, &EncodingProfile::default());
        assert!(out.sdp.ends_with("\r\n"));
        assert!(!out.sdp.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn test_payload_type_lookup() {
        assert_eq!(payload_type_for(CHROME_OFFER, MediaKind::Video, "H264"), Some(97));
        assert_eq!(payload_type_for(CHROME_OFFER, MediaKind::Video, "vp8"), Some(96));
        assert_eq!(payload_type_for(CHROME_OFFER, MediaKind::Audio, "OPUS/48000/2"), Some(111));
        assert_eq!(payload_type_for(CHROME_OFFER, MediaKind::Audio, "H264"), None);
    }
}
