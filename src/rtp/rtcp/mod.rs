//! Outbound RTCP requests.
//!
//! These are the structured forms handed to the transport. Serializing them to
//! bytes is the transport's business.

use super::Ssrc;

mod rr;
pub use rr::{ReceiverReport, ReceptionReport};

mod nack;
pub use nack::{Nack, NackEntry};

mod pli;
pub use pli::Pli;

mod fir;
pub use fir::{Fir, FirEntry};

/// RTCP requests produced by the producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rtcp {
    /// Receiver report. Also known as RR.
    ReceiverReport(ReceiverReport),
    /// Reports missing packets.
    Nack(Nack),
    /// Picture Loss Indiciation. When decoding a picture is not possible.
    Pli(Pli),
    /// Full Intra Request. Complete restart of a video decoder.
    Fir(Fir),
}

impl Rtcp {
    /// The media SSRC this request is about.
    pub fn ssrc(&self) -> Ssrc {
        match self {
            Rtcp::ReceiverReport(v) => v.report.ssrc,
            Rtcp::Nack(v) => v.ssrc,
            Rtcp::Pli(v) => v.ssrc,
            Rtcp::Fir(v) => v.entry.ssrc,
        }
    }

    /// Whether this is a PLI or FIR.
    pub fn is_keyframe_request(&self) -> bool {
        matches!(self, Rtcp::Pli(_) | Rtcp::Fir(_))
    }
}
