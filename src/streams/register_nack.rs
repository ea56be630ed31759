use std::ops::Range;
use std::time::{Duration, Instant};

use crate::rtp_::SeqNo;

/// Initial number of out of order packets we keep track of.
const INITIAL_MAX_MISORDER: u64 = 100;

/// Maximum window size we'll grow to.
const MAX_MAX_MISORDER: u64 = 1000;

/// The max number of NACKs we send for a single packet.
pub(crate) const MAX_NACKS: u8 = 5;

/// Tracks which sequence numbers are missing and when they were last asked for.
#[derive(Debug)]
pub struct NackRegister {
    /// Status of packets indexed by wrapping SeqNo.
    packets: Vec<PacketStatus>,

    /// Range of seq numbers considered for NACK.
    active: Option<Range<SeqNo>>,

    /// Current max misorder (buffer size - 1). Grows on premature eviction.
    max_misorder: u64,

    /// Retry interval of the last NACK pass.
    last_rtt: Option<Duration>,

    /// Packets that rolled out of the window without ever arriving.
    given_up: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct PacketStatus {
    received: bool,
    nack_count: u8,
    sent_at: Option<Instant>,
}

impl PacketStatus {
    fn needs_nack(&self, now: Instant, rtt: Duration) -> bool {
        if self.received || self.nack_count >= MAX_NACKS {
            return false;
        }

        match self.sent_at {
            None => true,
            Some(sent_at) => now.saturating_duration_since(sent_at) >= rtt,
        }
    }

    fn mark_received(&mut self) -> bool {
        let new = !self.received;
        self.received = true;
        new
    }

    fn reset(&mut self) {
        *self = PacketStatus::default();
    }

    fn mark_nacked(&mut self, now: Instant) {
        self.nack_count += 1;
        self.sent_at = Some(now);
    }
}

impl NackRegister {
    pub fn new() -> Self {
        let max_misorder = INITIAL_MAX_MISORDER;

        NackRegister {
            packets: vec![PacketStatus::default(); (max_misorder + 1) as usize],
            active: None,
            max_misorder,
            last_rtt: None,
            given_up: 0,
        }
    }

    /// Whether a packet with this sequence number would be new to us.
    pub fn accepts(&self, seq: SeqNo) -> bool {
        let Some(active) = self.active.clone() else {
            return true;
        };

        if seq < active.start {
            return false;
        }

        !self.packet(seq).received || seq > active.end
    }

    /// Register a received sequence number. Returns `true` if it is new.
    pub fn update(&mut self, seq: SeqNo, now: Instant) -> bool {
        let Some(active) = self.active.clone() else {
            self.init_with_seq(seq);
            return true;
        };

        if seq < active.start {
            return false;
        }

        let new = !self.packet_mut(seq).received || seq > active.end;

        let end = active.end.max(seq);

        let start: SeqNo = {
            let min = end.saturating_sub(self.max_misorder);
            let mut start = (*active.start).max(min);
            while start < *end {
                if !self.packet_mut(start.into()).received && start != *seq {
                    break;
                }
                start += 1;
            }
            start.into()
        };

        // A missing packet still inside its retry interval is about to be
        // evicted. The window is too small for the current loss pattern.
        let premature = (*active.start..*start)
            .take(self.packets.len())
            .any(|s| {
                let p = self.packet(s.into());
                let waiting = match (p.sent_at, self.last_rtt) {
                    (Some(sent_at), Some(rtt)) => now.saturating_duration_since(sent_at) < rtt,
                    _ => false,
                };
                !p.received && s != *seq && p.nack_count < MAX_NACKS && waiting
            });

        if premature {
            self.grow_buffer();
        }

        for s in (*active.start..*start).take(self.packets.len()) {
            let p = self.packet_mut(s.into());
            if !p.received && s != *seq {
                trace!("Seq no {} missing after {} attempts", s, p.nack_count);
                self.given_up += 1;
            }
            self.packet_mut(s.into()).reset();
        }

        if (start..=end).contains(&seq) {
            self.packet_mut(seq).mark_received();
        }

        self.active = Some(start..end);

        new
    }

    fn grow_buffer(&mut self) {
        if self.max_misorder >= MAX_MAX_MISORDER {
            return;
        }

        let new_max_misorder = (self.max_misorder * 2).min(MAX_MAX_MISORDER);

        trace!(
            "Growing NACK window from {} to {}",
            self.max_misorder,
            new_max_misorder
        );

        self.packets
            .resize((new_max_misorder + 1) as usize, PacketStatus::default());
        self.max_misorder = new_max_misorder;
    }

    fn init_with_seq(&mut self, seq: SeqNo) {
        self.active = Some(seq..seq);
        self.packet_mut(seq).mark_received();
    }

    pub fn max_seq(&self) -> Option<SeqNo> {
        self.active.as_ref().map(|a| a.end)
    }

    /// Sequence numbers due for a NACK at `now`.
    ///
    /// Each returned packet is counted as nacked and won't be returned again until
    /// `rtt` has passed.
    pub fn nack_due(&mut self, now: Instant, rtt: Duration) -> Vec<SeqNo> {
        self.last_rtt = Some(rtt);

        let Some(Range { start, end }) = self.active.clone() else {
            return vec![];
        };

        let mut due = vec![];

        for s in *start..=*end {
            let p = self.packet_mut(s.into());
            if p.needs_nack(now, rtt) {
                p.mark_nacked(now);
                due.push(s.into());
            }
        }

        due
    }

    /// Number of packets given up on since the last call.
    pub fn take_given_up(&mut self) -> u64 {
        std::mem::take(&mut self.given_up)
    }

    fn as_index(&self, seq: SeqNo) -> usize {
        (*seq % self.packets.len() as u64) as usize
    }

    fn packet(&self, seq: SeqNo) -> &PacketStatus {
        let index = self.as_index(seq);
        &self.packets[index]
    }

    fn packet_mut(&mut self, seq: SeqNo) -> &mut PacketStatus {
        let index = self.as_index(seq);
        &mut self.packets[index]
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use super::*;

    const RTT: Duration = Duration::from_millis(100);

    fn due(reg: &mut NackRegister, now: Instant) -> Vec<u64> {
        reg.nack_due(now, RTT).into_iter().map(|s| *s).collect()
    }

    #[test]
    fn active_window_sliding() {
        let now = Instant::now();
        let mut reg = NackRegister::new();

        assert!(reg.accepts(10.into()));
        assert!(reg.update(10.into(), now));

        // before window start
        assert!(!reg.accepts(9.into()));
        assert!(!reg.update(9.into(), now));

        // dupe
        assert!(!reg.accepts(10.into()));
        assert!(!reg.update(10.into(), now));

        let next = 12 + INITIAL_MAX_MISORDER;
        assert!(reg.update(next.into(), now));
        assert_eq!(reg.active.clone().unwrap(), 12.into()..next.into());

        // older packet inside window
        assert!(reg.accepts(13.into()));
        assert!(reg.update(13.into(), now));
        assert!(!reg.accepts(13.into()));
    }

    #[test]
    fn nothing_missing() {
        let now = Instant::now();
        let mut reg = NackRegister::new();
        assert!(due(&mut reg, now).is_empty());

        for i in 100..130 {
            reg.update(i.into(), now);
        }
        assert!(due(&mut reg, now).is_empty());
    }

    #[test]
    fn holes_are_due_once_per_rtt() {
        let now = Instant::now();
        let mut reg = NackRegister::new();

        for i in &[100, 101, 103, 105, 106, 107] {
            reg.update((*i).into(), now);
        }

        assert_eq!(due(&mut reg, now), vec![102, 104]);
        assert!(due(&mut reg, now + Duration::from_millis(50)).is_empty());
        assert_eq!(due(&mut reg, now + RTT), vec![102, 104]);

        // 102 arrives via RTX
        reg.update(102.into(), now + RTT);
        assert_eq!(due(&mut reg, now + RTT * 2), vec![104]);
    }

    #[test]
    fn stop_after_max_nacks() {
        let now = Instant::now();
        let mut reg = NackRegister::new();
        reg.update(1.into(), now);
        reg.update(3.into(), now);

        for i in 0..MAX_NACKS as u32 {
            assert_eq!(due(&mut reg, now + RTT * i), vec![2]);
        }
        assert!(due(&mut reg, now + RTT * 10).is_empty());
    }

    #[test]
    fn given_up_when_rolling_out() {
        let now = Instant::now();
        let mut reg = NackRegister::new();
        reg.update(0.into(), now);
        reg.update(2.into(), now);
        assert_eq!(reg.take_given_up(), 0);

        // 1 is missing and rolls out of the window
        let far = 2 + INITIAL_MAX_MISORDER;
        reg.update(far.into(), now);
        assert_eq!(reg.take_given_up(), 1);
        assert_eq!(reg.take_given_up(), 0);
    }

    #[test]
    fn huge_seq_gap_no_hang() {
        let now = Instant::now();
        let mut reg = NackRegister::new();

        reg.update(0.into(), now);
        reg.update(18446744073709551515.into(), now);
    }

    #[test]
    fn missing_across_u16_rollover() {
        let now = Instant::now();
        for missing in [65535_u64, 65536, 65537] {
            let mut reg = NackRegister::new();
            for i in (65530..65541).filter(|i| *i != missing) {
                reg.update(i.into(), now);
            }
            let due = reg.nack_due(now, RTT);
            assert_eq!(due.len(), 1);
            assert_eq!(due[0].as_u16(), missing as u16);
        }
    }
}
