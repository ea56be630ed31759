use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::encoding::EncodingTable;
use crate::rtp_::{PacketError, Rid, Rtcp, RtpHeader, RtpPacket, SeqNo, Ssrc};

pub use self::receive::{StreamRx, MAX_SCORE};

mod receive;
pub(crate) mod register;
pub(crate) mod register_nack;

/// An accepted packet, ready to be forwarded.
///
/// As emitted by [`Event::RtpPacket`][crate::Event::RtpPacket]. The packet is in
/// primary shape (RTX repaired) and mangled: payload type remapped and SSRC set
/// to the internal SSRC of the encoding.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaPacket {
    /// Index of the encoding the packet belongs to.
    pub encoding_idx: usize,

    /// Extended sequence number to avoid having to deal with ROC.
    pub seq_no: SeqNo,

    /// Whether the packet was recovered from RTX.
    pub repaired: bool,

    /// Whether the packet starts a key frame.
    pub keyframe: bool,

    /// The packet.
    pub packet: RtpPacket,
}

impl fmt::Debug for MediaPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaPacket")
            .field("encoding_idx", &self.encoding_idx)
            .field("seq_no", &self.seq_no)
            .field("repaired", &self.repaired)
            .field("keyframe", &self.keyframe)
            .field("header", &self.packet.header)
            .field("payload", &self.packet.payload.len())
            .finish()
    }
}

/// Event when an encoding gets bound to an incoming SSRC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAdded {
    /// Index of the encoding.
    pub encoding_idx: usize,
    /// The SSRC of the source.
    pub ssrc: Ssrc,
    /// SSRC used on forwarded packets.
    pub mapped_ssrc: Ssrc,
    /// The rid, if the encoding has one.
    pub rid: Option<Rid>,
}

/// Event when an encoded stream is considered paused/unpaused.
///
/// This means the stream has not received any data for some time (default 1.5 seconds).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPaused {
    /// Index of the encoding.
    pub encoding_idx: usize,
    /// The main SSRC of the encoded stream that paused.
    pub ssrc: Ssrc,
    /// Whether the stream is paused or not.
    pub paused: bool,
}

/// Callbacks from streams to whoever orchestrates them.
///
/// All callbacks happen synchronously inside the call that caused them.
pub(crate) trait StreamListener {
    /// A slot got bound. Called before the stream ingests its first packet.
    fn on_new_stream(&mut self, stream: &StreamRx);

    /// The score of a stream changed.
    fn on_stream_score(&mut self, encoding_idx: usize, score: u8, prev: u8);

    /// A stream went quiet, or came back.
    fn on_stream_paused(&mut self, encoding_idx: usize, paused: bool);

    /// The stream wants these sequence numbers resent.
    fn on_resend_packets(&mut self, now: Instant, ssrc: Ssrc, seqs: &[u16]);

    /// The stream can't continue decoding without a key frame.
    fn on_key_frame_needed(&mut self, now: Instant, ssrc: Ssrc);

    /// The stream assembled an RTCP packet to send upstream.
    fn on_send_rtcp(&mut self, rtcp: Rtcp);
}

/// One slot per negotiated encoding, lazily bound to a [`StreamRx`].
#[derive(Debug)]
pub(crate) struct Streams {
    slots: Vec<Option<StreamRx>>,

    /// Primary SSRC -> slot.
    by_ssrc: HashMap<Ssrc, usize>,

    /// RTX SSRC -> slot.
    by_rtx: HashMap<Ssrc, usize>,

    nack: bool,

    pause_threshold: Duration,
}

impl Streams {
    pub fn new(slot_count: usize, nack: bool, pause_threshold: Duration) -> Self {
        let mut slots = Vec::with_capacity(slot_count);
        slots.resize_with(slot_count, || None);

        Streams {
            slots,
            by_ssrc: HashMap::new(),
            by_rtx: HashMap::new(),
            nack,
            pause_threshold,
        }
    }

    /// Find the slot for an incoming packet, binding it if needed.
    ///
    /// RTX packets never bind a slot. They can only teach an already bound slot
    /// its RTX SSRC.
    pub fn resolve(
        &mut self,
        table: &EncodingTable,
        header: &RtpHeader,
        is_rtx: bool,
        listener: &mut dyn StreamListener,
    ) -> Result<usize, PacketError> {
        let ssrc = header.ssrc;

        let known = if is_rtx {
            self.by_rtx.get(&ssrc)
        } else {
            self.by_ssrc.get(&ssrc)
        };
        if let Some(idx) = known {
            return Ok(*idx);
        }

        let unknown = PacketError::UnknownStream(ssrc);

        // Advertised SSRCs.
        if is_rtx {
            if let Some(idx) = table.layer_by_rtx_ssrc(ssrc) {
                return self.learn_rtx(idx, ssrc).ok_or(unknown);
            }
        } else if let Some(idx) = table.layer_by_ssrc(ssrc) {
            return self.bind(table, idx, header, listener).ok_or(unknown);
        }

        // Layer label.
        let rid = if is_rtx {
            header.ext_vals.rid_repair
        } else {
            header.ext_vals.rid
        };

        if let Some(rid) = rid {
            let Some(idx) = table.layer_by_rid(rid) else {
                trace!("No encoding for rid {} SSRC {}", rid, ssrc);
                return Err(unknown);
            };
            return if is_rtx {
                self.learn_rtx(idx, ssrc).ok_or(unknown)
            } else {
                self.bind(table, idx, header, listener).ok_or(unknown)
            };
        }

        // By elimination. Only when the single layer has not advertised the SSRC.
        let advertised = table
            .layer(0)
            .map(|l| if is_rtx { l.rtx_ssrc } else { l.ssrc })
            .unwrap_or_default();
        if table.len() == 1 && advertised.is_none() {
            return if is_rtx {
                self.learn_rtx(0, ssrc).ok_or(unknown)
            } else {
                self.bind(table, 0, header, listener).ok_or(unknown)
            };
        }

        trace!("Unable to attribute SSRC {} to an encoding", ssrc);
        Err(unknown)
    }

    fn bind(
        &mut self,
        table: &EncodingTable,
        idx: usize,
        header: &RtpHeader,
        listener: &mut dyn StreamListener,
    ) -> Option<usize> {
        let layer = table.layer(idx)?;

        if layer.pt.map(|pt| pt != header.payload_type).unwrap_or(false) {
            debug!(
                "Encoding {} is pinned to another payload type than {}",
                idx, header.payload_type
            );
            return None;
        }

        let slot = self.slots.get_mut(idx)?;

        if let Some(bound) = slot {
            // Slots are never rebound.
            if bound.ssrc() != header.ssrc {
                debug!(
                    "Encoding {} already bound to SSRC {}, ignoring SSRC {}",
                    idx,
                    bound.ssrc(),
                    header.ssrc
                );
                return None;
            }
            return Some(idx);
        }

        let stream = StreamRx::new(
            idx,
            header.ssrc,
            layer.mapped_ssrc,
            layer.rid,
            table.kind(),
            self.nack && table.has_rtx(header.payload_type),
            self.pause_threshold,
        );

        listener.on_new_stream(&stream);

        self.by_ssrc.insert(header.ssrc, idx);
        *slot = Some(stream);

        Some(idx)
    }

    fn learn_rtx(&mut self, idx: usize, rtx: Ssrc) -> Option<usize> {
        let stream = self.slots.get_mut(idx)?.as_mut()?;

        if let Some(prev) = stream.rtx() {
            self.by_rtx.remove(&prev);
        }
        stream.set_rtx(rtx);
        self.by_rtx.insert(rtx, idx);

        Some(idx)
    }

    pub fn stream(&self, idx: usize) -> Option<&StreamRx> {
        self.slots.get(idx)?.as_ref()
    }

    pub fn stream_mut(&mut self, idx: usize) -> Option<&mut StreamRx> {
        self.slots.get_mut(idx)?.as_mut()
    }

    pub fn streams(&self) -> impl Iterator<Item = &StreamRx> {
        self.slots.iter().flatten()
    }

    pub fn stream_by_mapped_ssrc(&self, mapped: Ssrc) -> Option<&StreamRx> {
        self.streams().find(|s| s.mapped_ssrc() == mapped)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Max own fraction lost over active streams, 0 with none.
    pub fn worst_fraction_lost(&self) -> u8 {
        self.streams()
            .filter(|s| s.is_active())
            .map(|s| s.fraction_lost())
            .max()
            .unwrap_or(0)
    }

    pub fn handle_timeout(&mut self, now: Instant, listener: &mut dyn StreamListener) {
        let worst = self.worst_fraction_lost();

        for stream in self.slots.iter_mut().flatten() {
            stream.handle_timeout(now, worst, listener);
        }
    }

    /// Drop all bound streams. The slots remain, unbound.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.by_ssrc.clear();
        self.by_rtx.clear();
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::config::{EncodingParams, MediaKind, ProducerConfig};
    use crate::rtp_::ExtensionValues;

    #[derive(Debug, Default)]
    pub(crate) struct Recorder {
        pub new_streams: Vec<(usize, Ssrc)>,
        pub scores: Vec<(usize, u8, u8)>,
        pub paused: Vec<(usize, bool)>,
        pub resend: Vec<(Ssrc, Vec<u16>)>,
        pub keyframes: Vec<Ssrc>,
        pub rtcp: Vec<Rtcp>,
    }

    impl StreamListener for Recorder {
        fn on_new_stream(&mut self, stream: &StreamRx) {
            self.new_streams.push((stream.encoding_idx(), stream.ssrc()));
        }

        fn on_stream_score(&mut self, encoding_idx: usize, score: u8, prev: u8) {
            self.scores.push((encoding_idx, score, prev));
        }

        fn on_stream_paused(&mut self, encoding_idx: usize, paused: bool) {
            self.paused.push((encoding_idx, paused));
        }

        fn on_resend_packets(&mut self, _now: Instant, ssrc: Ssrc, seqs: &[u16]) {
            self.resend.push((ssrc, seqs.to_vec()));
        }

        fn on_key_frame_needed(&mut self, _now: Instant, ssrc: Ssrc) {
            self.keyframes.push(ssrc);
        }

        fn on_send_rtcp(&mut self, rtcp: Rtcp) {
            self.rtcp.push(rtcp);
        }
    }

    fn header(ssrc: u32, pt: u8, rid: Option<&str>, rid_repair: Option<&str>) -> RtpHeader {
        RtpHeader {
            ssrc: ssrc.into(),
            payload_type: pt.into(),
            ext_vals: ExtensionValues {
                rid: rid.map(Into::into),
                rid_repair: rid_repair.map(Into::into),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn simulcast() -> EncodingTable {
        let config = ProducerConfig::new(MediaKind::Video)
            .add_codec(96, 90_000, "video/VP8", Some(97))
            .add_encoding(EncodingParams::new(1).rid("l"))
            .add_encoding(EncodingParams::new(2).rid("h"))
            .add_encoding(EncodingParams::new(3).ssrc(3000).rtx_ssrc(3001));
        EncodingTable::new(&config).unwrap()
    }

    fn streams(table: &EncodingTable) -> Streams {
        Streams::new(table.len(), true, Duration::from_millis(1500))
    }

    #[test]
    fn bind_by_rid_then_by_ssrc() {
        let table = simulcast();
        let mut s = streams(&table);
        let mut rec = Recorder::default();

        let h = header(2000, 96, Some("h"), None);
        assert_eq!(s.resolve(&table, &h, false, &mut rec), Ok(1));
        assert_eq!(rec.new_streams, vec![(1, 2000.into())]);

        // later packets carry no rid
        let h = header(2000, 96, None, None);
        assert_eq!(s.resolve(&table, &h, false, &mut rec), Ok(1));
        assert_eq!(rec.new_streams.len(), 1);
        assert_eq!(s.stream(1).unwrap().mapped_ssrc(), 2.into());
    }

    #[test]
    fn bind_by_advertised_ssrc() {
        let table = simulcast();
        let mut s = streams(&table);
        let mut rec = Recorder::default();

        let h = header(3000, 96, None, None);
        assert_eq!(s.resolve(&table, &h, false, &mut rec), Ok(2));

        let h = header(3001, 97, None, None);
        assert_eq!(s.resolve(&table, &h, true, &mut rec), Ok(2));
        assert_eq!(s.stream(2).unwrap().rtx(), Some(3001.into()));
    }

    #[test]
    fn rtx_never_binds() {
        let table = simulcast();
        let mut s = streams(&table);
        let mut rec = Recorder::default();

        let h = header(1001, 97, None, Some("l"));
        assert_eq!(
            s.resolve(&table, &h, true, &mut rec),
            Err(PacketError::UnknownStream(1001.into()))
        );

        let h = header(3001, 97, None, None);
        assert!(s.resolve(&table, &h, true, &mut rec).is_err());
        assert!(rec.new_streams.is_empty());

        // once primary is bound, rid_repair learns the RTX SSRC
        let h = header(1000, 96, Some("l"), None);
        assert_eq!(s.resolve(&table, &h, false, &mut rec), Ok(0));
        let h = header(1001, 97, None, Some("l"));
        assert_eq!(s.resolve(&table, &h, true, &mut rec), Ok(0));
        let h = header(1001, 97, None, None);
        assert_eq!(s.resolve(&table, &h, true, &mut rec), Ok(0));
    }

    #[test]
    fn unknown_stream() {
        let table = simulcast();
        let mut s = streams(&table);
        let mut rec = Recorder::default();

        // no label with several layers
        let h = header(4000, 96, None, None);
        assert_eq!(
            s.resolve(&table, &h, false, &mut rec),
            Err(PacketError::UnknownStream(4000.into()))
        );

        // label not negotiated
        let h = header(4000, 96, Some("x"), None);
        assert!(s.resolve(&table, &h, false, &mut rec).is_err());

        // slot already bound to another SSRC
        let h = header(1000, 96, Some("l"), None);
        assert!(s.resolve(&table, &h, false, &mut rec).is_ok());
        let h = header(1100, 96, Some("l"), None);
        assert!(s.resolve(&table, &h, false, &mut rec).is_err());
        assert_eq!(s.stream(0).unwrap().ssrc(), 1000.into());
    }

    #[test]
    fn bind_respects_pinned_payload_type() {
        let config = ProducerConfig::new(MediaKind::Video)
            .add_codec(96, 90_000, "video/VP8", None)
            .add_codec(98, 90_000, "video/VP9", None)
            .add_encoding(EncodingParams::new(1).rid("l").pt(98));
        let table = EncodingTable::new(&config).unwrap();
        let mut s = streams(&table);
        let mut rec = Recorder::default();

        let h = header(1000, 96, Some("l"), None);
        assert!(s.resolve(&table, &h, false, &mut rec).is_err());

        let h = header(1000, 98, Some("l"), None);
        assert_eq!(s.resolve(&table, &h, false, &mut rec), Ok(0));
    }

    #[test]
    fn bind_single_layer_by_elimination() {
        let config = ProducerConfig::new(MediaKind::Audio)
            .add_codec(111, 48_000, "audio/opus", None)
            .add_encoding(EncodingParams::new(9));
        let table = EncodingTable::new(&config).unwrap();
        let mut s = streams(&table);
        let mut rec = Recorder::default();

        let h = header(1234, 111, None, None);
        assert_eq!(s.resolve(&table, &h, false, &mut rec), Ok(0));
        assert_eq!(s.slot_count(), 1);

        s.clear();
        assert!(s.stream(0).is_none());
        assert_eq!(s.slot_count(), 1);
    }
}
