//! Packet repair and mangling.
//!
//! Both are pure transforms on an owned packet.

use crate::encoding::EncodingTable;
use crate::rtp_::{PacketError, RtpHeader, RtpPacket, Ssrc};

/// Turn an RTX packet back into the primary packet it carries.
///
/// The 2 byte original sequence number is stripped from the payload, the payload
/// type is restored to the primary one and the SSRC set to `primary_ssrc`.
/// Packets not carrying an RTX payload type are returned unchanged, which makes
/// this idempotent.
pub(crate) fn repair(
    table: &EncodingTable,
    mut packet: RtpPacket,
    primary_ssrc: Ssrc,
) -> Result<RtpPacket, PacketError> {
    let header = &mut packet.header;

    let Some(pt) = table.primary_pt(header.payload_type) else {
        return Ok(packet);
    };

    let mut orig_seq_no_16 = 0;
    let n = RtpHeader::read_original_sequence_number(&packet.payload, &mut orig_seq_no_16);
    if n == 0 {
        // Probably padding only, used for probing.
        return Err(PacketError::MalformedRedundancyPayload(header.ssrc));
    }
    packet.payload.drain(0..n);

    trace!(
        "Repaired seq no {} -> {} SSRC {} -> {}",
        header.sequence_number,
        orig_seq_no_16,
        header.ssrc,
        primary_ssrc
    );

    header.sequence_number = orig_seq_no_16;
    header.ssrc = primary_ssrc;
    header.payload_type = pt;
    header.ext_vals.rid = header.ext_vals.rid_repair.take();

    Ok(packet)
}

/// Rewrite a packet for forwarding: remapped payload type and internal SSRC.
pub(crate) fn mangle(table: &EncodingTable, mut packet: RtpPacket, mapped_ssrc: Ssrc) -> RtpPacket {
    packet.header.payload_type = table.remap_pt(packet.header.payload_type);
    packet.header.ssrc = mapped_ssrc;
    packet
}
