use super::Ssrc;

/// A NACK indiciating packets missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nack {
    /// The SSRC this nack reports missing packets for.
    pub ssrc: Ssrc,
    /// The missing packets. This can be multiple segments.
    pub reports: Vec<NackEntry>,
}

/// A range of sequence numbers missing.
///
/// `pid` is the first missing packet, bit `n` of `blp` says whether `pid + n + 1`
/// is also missing.
#[allow(missing_docs)]
#[derive(Debug, PartialEq, Eq, Default, Clone, Copy)]
pub struct NackEntry {
    pub pid: u16,
    pub blp: u16,
}

impl Nack {
    /// Compress a list of missing sequence numbers into PID/BLP entries.
    ///
    /// The sequence numbers are expected in ascending order (modulo wrap-around).
    pub fn from_seq_numbers(ssrc: Ssrc, seqs: &[u16]) -> Nack {
        let mut reports: Vec<NackEntry> = vec![];

        for seq in seqs {
            if let Some(last) = reports.last_mut() {
                let diff = seq.wrapping_sub(last.pid);
                if diff == 0 {
                    continue;
                }
                if diff <= 16 {
                    last.blp |= 1 << (diff - 1);
                    continue;
                }
            }
            reports.push(NackEntry { pid: *seq, blp: 0 });
        }

        Nack { ssrc, reports }
    }

    /// All sequence numbers reported missing.
    pub fn seq_numbers(&self) -> impl Iterator<Item = u16> + '_ {
        self.reports.iter().flat_map(|r| r.seq_numbers())
    }
}

impl NackEntry {
    /// Sequence numbers covered by this entry.
    pub fn seq_numbers(&self) -> impl Iterator<Item = u16> {
        let NackEntry { pid, blp } = *self;
        std::iter::once(pid).chain(
            (0..16)
                .filter(move |i| blp & (1 << i) > 0)
                .map(move |i| pid.wrapping_add(i + 1)),
        )
    }
}
