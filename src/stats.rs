//! Read-only snapshots of producer state.

use serde::Serialize;

use crate::config::{MediaKind, TranslateMode};
use crate::feedback::{LayerScore, TraceEventType};
use crate::rtp_::{Rid, Ssrc, VideoOrientation};
use crate::ProducerId;

/// State of one bound stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSnapshot {
    /// Index of the encoding the stream is bound to.
    pub encoding_idx: usize,
    /// SSRC of the source.
    pub ssrc: Ssrc,
    /// RTX SSRC, once known.
    pub rtx_ssrc: Option<Ssrc>,
    /// SSRC on forwarded packets.
    pub mapped_ssrc: Ssrc,
    /// Rid of the encoding.
    pub rid: Option<Rid>,
    /// 0 to 10.
    pub score: u8,
    /// Whether the stream is paused.
    pub paused: bool,
    /// Fraction lost in the last receiver report, in 1/256.
    pub fraction_lost: u8,
    /// Interarrival jitter in RTP time units.
    pub jitter: u32,
    /// Highest extended sequence number.
    pub max_seq: Option<u64>,
    /// Accepted packets, including repaired.
    pub packets: u64,
    /// Accepted payload bytes, including repaired.
    pub bytes: u64,
    /// Packets recovered from RTX.
    pub repaired: u64,
    /// Packets dropped as already received.
    pub duplicates: u64,
    /// Sequence numbers asked to be resent.
    pub nacked: u64,
    /// Packets given up on.
    pub lost: u64,
}

/// Packets the producer dropped before they reached a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscardCounters {
    /// Could not be attributed to an encoding.
    pub unknown_stream: u64,
    /// Payload type not negotiated.
    pub unknown_payload_type: u64,
    /// RTX too short to repair.
    pub malformed_rtx: u64,
    /// Already received.
    pub duplicate: u64,
}

/// State of a producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerSnapshot {
    /// Producer id.
    pub id: ProducerId,
    /// Audio or video.
    pub kind: MediaKind,
    /// Translate mode.
    pub translate_mode: TranslateMode,
    /// Aggregate score.
    pub score: u8,
    /// Per encoding scores.
    pub layers: Vec<LayerScore>,
    /// Bound streams.
    pub streams: Vec<StreamSnapshot>,
    /// Last orientation seen, video only.
    pub video_orientation: Option<VideoOrientation>,
    /// Enabled trace events.
    pub trace_events: Vec<TraceEventType>,
    /// Dropped packets.
    pub discarded: DiscardCounters,
    /// NACK packets sent.
    pub nacks: u64,
    /// PLIs sent.
    pub plis: u64,
    /// FIRs sent.
    pub firs: u64,
    /// Whether a decoded frame is available.
    pub has_frame: bool,
    /// Master producer, if a slave.
    pub master: Option<ProducerId>,
    /// Whether the producer is closed.
    pub closed: bool,
}
