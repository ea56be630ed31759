use std::time::{Duration, Instant};

use crate::config::MediaKind;
use crate::rtp_::{ReceiverReport, Rid, RtpHeader, Rtcp, SeqNo, Ssrc};
use crate::stats::StreamSnapshot;
use crate::util::already_happened;

use super::register::ReceiverRegister;
use super::StreamListener;

/// Time between regular receiver reports. Also the score evaluation interval.
pub(crate) const RR_INTERVAL: Duration = Duration::from_millis(1000);

/// Retry interval for NACK. There is no RTT estimate at this stage.
pub(crate) const NACK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Score of a stream receiving without loss.
pub const MAX_SCORE: u8 = 10;

/// Incoming encoded stream bound to one encoding.
///
/// A stream is a primary SSRC + optional RTX SSRC.
#[derive(Debug)]
pub struct StreamRx {
    /// Index of the encoding this stream is bound to.
    encoding_idx: usize,

    /// SSRC of the source. Never changes once bound.
    ssrc: Ssrc,

    /// Identifier of a resend (RTX) stream. This can be set later, once we discover it.
    rtx: Option<Ssrc>,

    /// SSRC put on forwarded packets.
    mapped_ssrc: Ssrc,

    rid: Option<Rid>,

    kind: MediaKind,

    /// Whether NACK is used for this stream.
    nack: bool,

    /// Register of received packets.
    register: ReceiverRegister,

    /// Timestamp of the last accepted packet.
    last_used: Instant,

    /// Last time we produced a receiver report.
    last_receiver_report: Instant,

    /// Own fraction lost in the last receiver report.
    fraction_lost: u8,

    score: u8,

    /// Whether we have received anything at all.
    received: bool,

    /// A stream is paused when it has received nothing for `pause_threshold`.
    paused: bool,

    pause_threshold: Duration,

    stats: StreamRxStats,
}

/// Holder of stats.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct StreamRxStats {
    /// count of bytes received, including retransmissions
    bytes: u64,
    /// count of packets received, including retransmissions
    packets: u64,
    /// count of packets that came in repaired from RTX
    repaired: u64,
    /// count of packets dropped as already received
    duplicates: u64,
    /// count of packets we asked to have resent
    nacked: u64,
    /// count of packets given up on
    lost: u64,
}

impl StreamRx {
    pub(crate) fn new(
        encoding_idx: usize,
        ssrc: Ssrc,
        mapped_ssrc: Ssrc,
        rid: Option<Rid>,
        kind: MediaKind,
        nack: bool,
        pause_threshold: Duration,
    ) -> Self {
        debug!(
            "Create StreamRx for SSRC: {} encoding: {} rid: {:?}",
            ssrc, encoding_idx, rid
        );

        StreamRx {
            encoding_idx,
            ssrc,
            rtx: None,
            mapped_ssrc,
            rid,
            kind,
            nack,
            register: ReceiverRegister::new(),
            last_used: already_happened(),
            last_receiver_report: already_happened(),
            fraction_lost: 0,
            score: 0,
            received: false,
            paused: false,
            pause_threshold,
            stats: StreamRxStats::default(),
        }
    }

    /// Index of the encoding this stream is bound to.
    pub fn encoding_idx(&self) -> usize {
        self.encoding_idx
    }

    /// The (primary) SSRC of this encoded stream.
    pub fn ssrc(&self) -> Ssrc {
        self.ssrc
    }

    /// The resend (RTX) SSRC of this encoded stream.
    pub fn rtx(&self) -> Option<Ssrc> {
        self.rtx
    }

    /// The SSRC on forwarded packets.
    pub fn mapped_ssrc(&self) -> Ssrc {
        self.mapped_ssrc
    }

    /// Rid of the encoding, if it has one.
    pub fn rid(&self) -> Option<Rid> {
        self.rid
    }

    /// Current score, 0 to 10.
    pub fn score(&self) -> u8 {
        self.score
    }

    /// Whether the stream is paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Whether the stream has received and is not paused.
    pub fn is_active(&self) -> bool {
        self.received && !self.paused
    }

    /// Own fraction lost in the last receiver report, in 1/256.
    pub fn fraction_lost(&self) -> u8 {
        self.fraction_lost
    }

    pub(crate) fn set_rtx(&mut self, rtx: Ssrc) {
        if self.rtx == Some(rtx) {
            return;
        }
        debug!("SSRC {} associated with RTX: {}", self.ssrc, rtx);
        self.rtx = Some(rtx);
    }

    /// Ingest a packet already in primary shape.
    ///
    /// Returns the extended sequence number, or `None` if the packet was a duplicate.
    pub(crate) fn receive(
        &mut self,
        now: Instant,
        header: &RtpHeader,
        payload_len: usize,
        clock_rate: u32,
        repaired: bool,
        listener: &mut dyn StreamListener,
    ) -> Option<SeqNo> {
        let seq_no = header.sequence_number(self.register.max_seq());

        if !self.register.accepts(seq_no) {
            trace!("Duplicate seq_no {} on SSRC {}", seq_no, self.ssrc);
            self.stats.duplicates += 1;
            return None;
        }

        self.register
            .update(seq_no, now, header.timestamp, clock_rate);

        self.last_used = now;
        self.stats.packets += 1;
        self.stats.bytes += payload_len as u64;
        if repaired {
            self.stats.repaired += 1;
        }

        if !self.received {
            self.received = true;
            self.set_score(MAX_SCORE, listener);
        } else if self.paused {
            self.paused = false;
            debug!("Unpaused StreamRx with SSRC: {}", self.ssrc);
            listener.on_stream_paused(self.encoding_idx, false);
            self.set_score(MAX_SCORE, listener);
        }

        Some(seq_no)
    }

    /// Periodic housekeeping.
    ///
    /// `worst_fraction_lost` is the worst loss over all active streams of the producer
    /// and is what this stream reports upstream if it is worse than its own.
    pub(crate) fn handle_timeout(
        &mut self,
        now: Instant,
        worst_fraction_lost: u8,
        listener: &mut dyn StreamListener,
    ) {
        if !self.received {
            return;
        }

        if !self.paused && now >= self.last_used + self.pause_threshold {
            self.paused = true;
            debug!("Paused StreamRx with SSRC: {}", self.ssrc);
            listener.on_stream_paused(self.encoding_idx, true);
            self.set_score(0, listener);
        }

        if self.paused {
            return;
        }

        if self.nack {
            let due: Vec<u16> = self
                .register
                .nack_due(now, NACK_RETRY_INTERVAL)
                .iter()
                .map(|s| s.as_u16())
                .collect();

            if !due.is_empty() {
                self.stats.nacked += due.len() as u64;
                listener.on_resend_packets(now, self.ssrc, &due);
            }
        }

        let given_up = self.register.take_given_up();
        if given_up > 0 {
            self.stats.lost += given_up;
            if self.kind.is_video() {
                debug!(
                    "Gave up on {} packets for SSRC {}, need key frame",
                    given_up, self.ssrc
                );
                listener.on_key_frame_needed(now, self.ssrc);
            }
        }

        if now >= self.last_receiver_report + RR_INTERVAL {
            self.create_rr_and_update(now, worst_fraction_lost, listener);
        }
    }

    fn create_rr_and_update(
        &mut self,
        now: Instant,
        worst_fraction_lost: u8,
        listener: &mut dyn StreamListener,
    ) {
        self.last_receiver_report = now;

        let Some(mut report) = self.register.reception_report(self.ssrc) else {
            return;
        };

        self.fraction_lost = report.fraction_lost;
        report.fraction_lost = report.fraction_lost.max(worst_fraction_lost);

        trace!("Created feedback RR for SSRC {}: {:?}", self.ssrc, report);
        listener.on_send_rtcp(Rtcp::ReceiverReport(ReceiverReport { report }));

        self.set_score(score_from_fraction_lost(self.fraction_lost), listener);
    }

    fn set_score(&mut self, score: u8, listener: &mut dyn StreamListener) {
        let prev = self.score;
        if prev == score {
            return;
        }
        self.score = score;
        listener.on_stream_score(self.encoding_idx, score, prev);
    }

    pub(crate) fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            encoding_idx: self.encoding_idx,
            ssrc: self.ssrc,
            rtx_ssrc: self.rtx,
            mapped_ssrc: self.mapped_ssrc,
            rid: self.rid,
            score: self.score,
            paused: self.paused,
            fraction_lost: self.fraction_lost,
            jitter: self.register.jitter() as u32,
            max_seq: self.register.max_seq().map(|s| *s),
            packets: self.stats.packets,
            bytes: self.stats.bytes,
            repaired: self.stats.repaired,
            duplicates: self.stats.duplicates,
            nacked: self.stats.nacked,
            lost: self.stats.lost,
        }
    }
}

/// Loss based score. No loss is 10, 50% loss is 1.
pub(crate) fn score_from_fraction_lost(fraction_lost: u8) -> u8 {
    let delivered = 1.0 - fraction_lost as f32 / 256.0;
    (delivered.powi(4) * MAX_SCORE as f32).round() as u8
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::streams::test::Recorder;

    fn header(seq: u16) -> RtpHeader {
        RtpHeader {
            ssrc: 1000.into(),
            payload_type: 96.into(),
            sequence_number: seq,
            timestamp: seq as u32 * 3000,
            ..Default::default()
        }
    }

    fn stream() -> StreamRx {
        StreamRx::new(
            0,
            1000.into(),
            5000.into(),
            None,
            MediaKind::Video,
            true,
            Duration::from_millis(1500),
        )
    }

    #[test]
    fn score_curve() {
        assert_eq!(score_from_fraction_lost(0), 10);
        assert_eq!(score_from_fraction_lost(13), 8);
        assert_eq!(score_from_fraction_lost(128), 1);
        assert_eq!(score_from_fraction_lost(255), 0);
    }

    #[test]
    fn first_packet_scores_and_duplicates_drop() {
        let now = Instant::now();
        let mut rec = Recorder::default();
        let mut s = stream();

        assert!(s.receive(now, &header(1), 10, 90_000, false, &mut rec).is_some());
        assert_eq!(rec.scores, vec![(0, 10, 0)]);
        assert!(s.receive(now, &header(1), 10, 90_000, false, &mut rec).is_none());
        assert_eq!(s.snapshot().duplicates, 1);
    }

    #[test]
    fn pause_and_resume() {
        let now = Instant::now();
        let mut rec = Recorder::default();
        let mut s = stream();

        s.receive(now, &header(1), 10, 90_000, false, &mut rec);
        s.handle_timeout(now + Duration::from_millis(1499), 0, &mut rec);
        assert!(rec.paused.is_empty());

        s.handle_timeout(now + Duration::from_millis(1500), 0, &mut rec);
        assert_eq!(rec.paused, vec![(0, true)]);
        assert_eq!(s.score(), 0);
        assert!(!s.is_active());

        s.receive(now + Duration::from_secs(2), &header(2), 10, 90_000, false, &mut rec);
        assert_eq!(rec.paused, vec![(0, true), (0, false)]);
        assert_eq!(rec.scores, vec![(0, 10, 0), (0, 0, 10), (0, 10, 0)]);
    }

    #[test]
    fn nack_for_hole() {
        let now = Instant::now();
        let mut rec = Recorder::default();
        let mut s = stream();

        s.receive(now, &header(1), 10, 90_000, false, &mut rec);
        s.receive(now, &header(4), 10, 90_000, false, &mut rec);
        s.handle_timeout(now, 0, &mut rec);

        assert_eq!(rec.resend, vec![(1000.into(), vec![2, 3])]);
    }

    #[test]
    fn receiver_report_uses_worst_fraction_lost() {
        let now = Instant::now();
        let mut rec = Recorder::default();
        let mut s = stream();

        for i in 1..=10 {
            s.receive(now, &header(i), 10, 90_000, false, &mut rec);
        }
        s.handle_timeout(now + RR_INTERVAL, 77, &mut rec);

        let Some(Rtcp::ReceiverReport(rr)) = rec.rtcp.last() else {
            panic!("expected receiver report, got {:?}", rec.rtcp);
        };
        assert_eq!(rr.report.fraction_lost, 77);
        assert_eq!(s.fraction_lost(), 0);
        assert_eq!(s.score(), 10);
    }
}
