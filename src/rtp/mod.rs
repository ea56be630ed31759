use thiserror::Error;

mod id;
pub use id::{ProducerId, Pt, Rid, SeqNo, Ssrc};

mod ext;
pub use ext::{ExtensionValues, VideoOrientation};

mod header;
pub use header::{RtpHeader, RtpPacket};

mod rtcp;
pub use rtcp::*;

/// Reasons an inbound RTP packet is dropped.
///
/// These never surface as failures of the producer. They are returned inside
/// [`ReceiveResult::Discarded`][crate::ReceiveResult::Discarded] and counted.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// No negotiated encoding matches the packet.
    #[error("No stream matches SSRC {0}")]
    UnknownStream(Ssrc),

    /// Payload type not negotiated for the producer.
    #[error("Unknown payload type {0}")]
    UnknownPayloadType(Pt),

    /// RTX packet without room for the original sequence number.
    #[error("RTX payload too short for SSRC {0}")]
    MalformedRedundancyPayload(Ssrc),

    /// Sequence number already received.
    #[error("Duplicate packet")]
    Duplicate,

    /// The producer is closed.
    #[error("Producer is closed")]
    Closed,
}
