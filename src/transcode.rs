//! The boundary towards an external transcoder.
//!
//! The producer never decodes media itself. In the translating modes it hands
//! accepted packets to these traits and keeps whatever frame comes back.

use std::sync::Arc;

use crate::MediaPacket;

/// A decoded frame, opaque to the producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// RTP time of the frame.
    pub rtp_time: u32,
    /// Decoded data.
    pub data: Vec<u8>,
}

/// Frames are shared with slaves without copying.
pub type SharedFrame = Arc<DecodedFrame>;

/// Receives packets in [`TranslateMode::UnpackAndProduce`][crate::TranslateMode::UnpackAndProduce].
pub trait Unpacker: Send {
    /// Take an accepted packet.
    fn unpack(&mut self, packet: &MediaPacket);
}

/// Receives packets in [`TranslateMode::DecodeAndEncode`][crate::TranslateMode::DecodeAndEncode].
pub trait FrameDecoder: Send {
    /// Take an accepted packet. Returns a frame when one is complete.
    fn decode(&mut self, packet: &MediaPacket) -> Option<DecodedFrame>;
}
