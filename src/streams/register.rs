use std::time::{Duration, Instant};

use crate::rtp_::{ReceptionReport, SeqNo, Ssrc};

use super::register_nack::NackRegister;

/// Sequence, loss and jitter bookkeeping for one received stream.
#[derive(Debug)]
pub struct ReceiverRegister {
    nack: NackRegister,

    /// First sequence number received
    first: Option<SeqNo>,

    /// Number of packets received
    count: u64,

    /// Previously received time point.
    time_point_prior: Option<TimePoint>,

    /// Expected at last reception report generation.
    expected_prior: i64,

    /// Received at last reception report generation.
    received_prior: i64,

    /// Estimated jitter in the media time base.
    jitter: f32,
}

#[derive(Debug, Clone, Copy)]
struct TimePoint {
    arrival: Instant,
    rtp_time: u32,
    clock_rate: u32,
}

impl TimePoint {
    fn is_same(&self, other: TimePoint) -> bool {
        self.rtp_time == other.rtp_time
    }

    /// https://www.rfc-editor.org/rfc/rfc3550#appendix-A.8
    fn delta(&self, other: TimePoint) -> f32 {
        // Microseconds, since milliseconds are too coarse for a 90kHz clock.
        let rdur = ((self.rtp_time.wrapping_sub(other.rtp_time) as i32) as f32 * 1_000_000.0)
            / self.clock_rate as f32;

        let tdur = self.arrival.saturating_duration_since(other.arrival).as_micros() as f32;

        (tdur - rdur).abs()
    }
}

impl ReceiverRegister {
    pub fn new() -> Self {
        ReceiverRegister {
            nack: NackRegister::new(),
            first: None,
            count: 0,
            time_point_prior: None,
            expected_prior: 0,
            received_prior: 0,
            jitter: 0.0,
        }
    }

    pub fn accepts(&self, seq: SeqNo) -> bool {
        self.nack.accepts(seq)
    }

    pub fn update(&mut self, seq: SeqNo, arrival: Instant, rtp_time: u32, clock_rate: u32) -> bool {
        if self.first.is_none() {
            self.first = Some(seq);
        }

        let new = self.nack.update(seq, arrival);

        if new {
            self.count += 1;
        }

        self.update_time(arrival, rtp_time, clock_rate);

        new
    }

    pub fn nack_due(&mut self, now: Instant, rtt: Duration) -> Vec<SeqNo> {
        self.nack.nack_due(now, rtt)
    }

    pub fn take_given_up(&mut self) -> u64 {
        self.nack.take_given_up()
    }

    /// Create a new reception report.
    ///
    /// This modifies the state since fraction_lost is calculated
    /// since the last call to this function.
    pub fn reception_report(&mut self, ssrc: Ssrc) -> Option<ReceptionReport> {
        let first = self.first?;
        let last = self.max_seq()?;

        let expected = expected(first, last);

        Some(ReceptionReport {
            ssrc,
            fraction_lost: self.fraction_lost(expected, self.count as i64),
            packets_lost: packets_lost(expected, self.count as i64),
            max_seq: (*last % ((u32::MAX as u64) + 1_u64)) as u32,
            jitter: self.jitter as u32,
        })
    }

    pub fn max_seq(&self) -> Option<SeqNo> {
        self.nack.max_seq()
    }

    pub fn jitter(&self) -> f32 {
        self.jitter
    }

    fn update_time(&mut self, arrival: Instant, rtp_time: u32, clock_rate: u32) {
        let tp = TimePoint {
            arrival,
            rtp_time,
            clock_rate,
        };

        if let Some(prior) = self.time_point_prior {
            // Packets of the same frame share rtp_time. Only the first one counts
            // towards jitter.
            if tp.is_same(prior) {
                return;
            }

            let d = tp.delta(prior);

            self.jitter += (1.0 / 16.0) * (d - self.jitter);
        }

        self.time_point_prior = Some(tp);
    }

    // https://www.rfc-editor.org/rfc/rfc3550#appendix-A.3

    /// Fraction lost since last call.
    fn fraction_lost(&mut self, expected: i64, received: i64) -> u8 {
        let expected_interval = expected - self.expected_prior;
        self.expected_prior = expected;

        let received_interval = received - self.received_prior;
        self.received_prior = received;

        let lost_interval = expected_interval - received_interval;

        let lost = if expected_interval == 0 || lost_interval <= 0 {
            0
        } else {
            ((lost_interval << 8) / expected_interval).min(255)
        } as u8;

        trace!("Reception fraction lost: {}", lost);

        lost
    }
}

/// Absolute number of lost packets, clamped to 24 bits.
fn packets_lost(expected: i64, received: i64) -> u32 {
    let lost_t = expected - received;
    if lost_t > 0x7fffff {
        0x7fffff_u32
    } else if lost_t < -0x7fffff {
        0x800000_u32
    } else {
        lost_t as u32
    }
}

fn expected(first: SeqNo, last: SeqNo) -> i64 {
    let delta = (*last - *first) as i64;
    delta.saturating_add(1)
}
