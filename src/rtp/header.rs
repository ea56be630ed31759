use super::ext::ExtensionValues;
use super::{Pt, SeqNo, Ssrc};

/// Parsed header from an RTP packet.
///
/// Wire parsing happens before the producer. This is the structured form the
/// producer operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// For video, this marker signifies the end of a series of packets that
    /// together form a single video frame.
    /// For audio, it marks the beginning of a talkspurt, which is a burst of
    /// audio packets.
    pub marker: bool,
    /// Type of payload being carried. What this correlates to is negotiated out of band.
    pub payload_type: Pt,
    /// Sequence number increasing by 1 for each RTP packet.
    pub sequence_number: u16,
    /// Timestamp in media time for the RTP packet. What the media time base is depends
    /// on the codec.
    pub timestamp: u32,
    /// Sender source identifier.
    pub ssrc: Ssrc,
    /// The extension values parsed using the negotiated extension mapping.
    pub ext_vals: ExtensionValues,
}

/// An RTP packet as handed to the producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// Parsed RTP header.
    pub header: RtpHeader,
    /// RTP payload. This contains no header and no padding.
    pub payload: Vec<u8>,
}

impl RtpHeader {
    /// For RTX the original sequence number is inserted before the RTP payload.
    ///
    /// Returns the number of bytes consumed, 0 if the buffer is too short.
    pub fn read_original_sequence_number(buf: &[u8], seq_no: &mut u16) -> usize {
        if buf.len() < 2 {
            // This is not an RTX packet, probably a padding packet
            return 0;
        }
        *seq_no = u16::from_be_bytes([buf[0], buf[1]]);
        2
    }

    /// Sequencer number of this RTP header given the previous number.
    ///
    /// The logic detects wrap-arounds of the 16-bit RTP sequence number.
    pub fn sequence_number(&self, previous: Option<SeqNo>) -> SeqNo {
        let e_seq = extend_u16(previous.map(|v| *v), self.sequence_number);
        e_seq.into()
    }
}

macro_rules! mk_extend {
    ($id:ident, $t:ty, $bits:expr) => {
        /// "extend" a less than 64 bit sequence number into a 64 bit by
        /// using the knowledge of the previous such sequence number.
        pub fn $id(prev_ext_seq: Option<u64>, seq: $t) -> u64 {
            const MAX: u64 = 2_u64.pow($bits); // u16: 65_536;
            const HALF: u64 = MAX / 2; // u16: 32_768
            const BITS: usize = $bits;
            const VAL_MASK: u64 = ((1 << BITS) - 1);
            const ROC_MASK: i64 = (u64::MAX >> BITS) as i64;

            // Mask seq to the N bits we are considering.
            let seq = seq as u64 & VAL_MASK;

            let Some(prev_index) = prev_ext_seq else {
                // No wrap-around so far.
                return seq;
            };

            let roc = (prev_index >> BITS) as i64; // how many wrap-arounds.
            let prev_seq = prev_index & (MAX - 1); // u16: 0xffff

            let v = if prev_seq < HALF {
                if seq > HALF + prev_seq {
                    (roc - 1) & ROC_MASK
                } else {
                    roc
                }
            } else if prev_seq > seq + HALF {
                (roc + 1) & ROC_MASK
            } else {
                roc
            };

            if v < 0 {
                return 0;
            }

            (v as u64) * MAX + seq
        }
    };
}

mk_extend!(extend_u16, u16, 16);

impl Default for RtpHeader {
    fn default() -> Self {
        Self {
            marker: false,
            payload_type: 1.into(),
            sequence_number: 0,
            timestamp: 0,
            ssrc: 0.into(),
            ext_vals: ExtensionValues::default(),
        }
    }
}
