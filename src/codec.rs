//! Codec identification and key frame detection.

use std::fmt;

use serde::Serialize;

/// Codecs the producer knows how to inspect.
///
/// Anything else passes through untouched, but key frames can't be detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// `audio/opus`
    Opus,
    /// `video/VP8`
    Vp8,
    /// `video/VP9`
    Vp9,
    /// `video/H264`
    H264,
    /// Any other MIME type.
    Other,
}

impl Codec {
    /// Parse a MIME type such as `video/VP8`. Case insensitive.
    pub fn from_mime_type(mime: &str) -> Codec {
        let lc = mime.to_ascii_lowercase();
        match lc.as_str() {
            "audio/opus" => Codec::Opus,
            "video/vp8" => Codec::Vp8,
            "video/vp9" => Codec::Vp9,
            "video/h264" => Codec::H264,
            _ => Codec::Other,
        }
    }

    /// Whether the RTP payload starts a key frame.
    pub fn is_keyframe(&self, payload: &[u8]) -> bool {
        match self {
            Codec::Vp8 => detect_vp8_keyframe(payload),
            Codec::Vp9 => detect_vp9_keyframe(payload),
            Codec::H264 => detect_h264_keyframe(payload),
            Codec::Opus | Codec::Other => false,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Codec::Opus => "opus",
            Codec::Vp8 => "vp8",
            Codec::Vp9 => "vp9",
            Codec::H264 => "h264",
            Codec::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// VP8 payload descriptor, RFC 7741.
pub(crate) fn detect_vp8_keyframe(payload: &[u8]) -> bool {
    let Some(&b0) = payload.first() else {
        return false;
    };

    // Only the first packet of a frame (S=1, PID=0) carries the payload header.
    let s = (b0 & 0x10) >> 4;
    let pid = b0 & 0x07;
    if s != 1 || pid != 0 {
        return false;
    }

    let mut idx = 1;

    if b0 & 0x80 > 0 {
        let Some(&ext) = payload.get(idx) else {
            return false;
        };
        idx += 1;

        // PictureID
        if ext & 0x80 > 0 {
            let Some(&p) = payload.get(idx) else {
                return false;
            };
            idx += if p & 0x80 > 0 { 2 } else { 1 };
        }
        // TL0PICIDX
        if ext & 0x40 > 0 {
            idx += 1;
        }
        // TID/KEYIDX
        if ext & 0x20 > 0 || ext & 0x10 > 0 {
            idx += 1;
        }
    }

    // P=0 is a key frame.
    payload.get(idx).map(|b| b & 0x01 == 0).unwrap_or(false)
}

/// VP9 payload descriptor. A key frame starts with B=1 and P=0.
pub(crate) fn detect_vp9_keyframe(payload: &[u8]) -> bool {
    let Some(&b0) = payload.first() else {
        return false;
    };

    let p = b0 & 0x40 > 0;
    let b = b0 & 0x08 > 0;

    !p && b
}

const NALU_IDR: u8 = 5;
const NALU_SPS: u8 = 7;
const NALU_STAP_A: u8 = 24;
const NALU_FU_A: u8 = 28;

/// H.264 key frames are IDR slices or SPS, possibly aggregated (STAP-A) or
/// fragmented (FU-A).
pub(crate) fn detect_h264_keyframe(payload: &[u8]) -> bool {
    let Some(&b0) = payload.first() else {
        return false;
    };

    let is_key = |t: u8| t == NALU_IDR || t == NALU_SPS;

    match b0 & 0x1f {
        NALU_STAP_A => {
            let mut offset = 1;
            while offset + 2 < payload.len() {
                let size = u16::from_be_bytes([payload[offset], payload[offset + 1]]) as usize;
                if is_key(payload[offset + 2] & 0x1f) {
                    return true;
                }
                offset += 2 + size;
            }
            false
        }
        NALU_FU_A => {
            let Some(&fu) = payload.get(1) else {
                return false;
            };
            let start = fu & 0x80 > 0;
            start && is_key(fu & 0x1f)
        }
        t => is_key(t),
    }
}
