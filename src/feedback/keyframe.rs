use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::KeyframeRequestKind;
use crate::rtp_::{Fir, FirEntry, Pli, Rtcp, Ssrc};

/// Outstanding key frame requests, one per SSRC.
///
/// A request is left outstanding for `wait`. Further requests for the same SSRC
/// during that time are coalesced. If no key frame arrives, the request is sent
/// once more and then dropped.
#[derive(Debug)]
pub(crate) struct KeyframeRequests {
    kind: KeyframeRequestKind,
    wait: Duration,
    pending: HashMap<Ssrc, Pending>,
    /// FIR sequence number per SSRC.
    fir_seq_no: HashMap<Ssrc, u8>,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    expires: Instant,
    retry_on_timeout: bool,
}

impl KeyframeRequests {
    pub fn new(kind: KeyframeRequestKind, wait: Duration) -> Self {
        KeyframeRequests {
            kind,
            wait,
            pending: HashMap::new(),
            fir_seq_no: HashMap::new(),
        }
    }

    /// Ask for a key frame. `None` if a request for the SSRC is already outstanding.
    pub fn request(&mut self, now: Instant, ssrc: Ssrc) -> Option<Rtcp> {
        if self.pending.contains_key(&ssrc) {
            trace!("Key frame request for SSRC {} coalesced", ssrc);
            return None;
        }

        self.pending.insert(
            ssrc,
            Pending {
                expires: now + self.wait,
                retry_on_timeout: true,
            },
        );

        Some(self.create(ssrc))
    }

    /// A key frame arrived, the request (if any) is satisfied.
    pub fn keyframe_received(&mut self, ssrc: Ssrc) {
        if self.pending.remove(&ssrc).is_some() {
            trace!("Key frame request for SSRC {} satisfied", ssrc);
        }
    }

    #[cfg(test)]
    pub fn is_pending(&self, ssrc: Ssrc) -> bool {
        self.pending.contains_key(&ssrc)
    }

    /// Retry expired requests once, drop those already retried.
    pub fn handle_timeout(&mut self, now: Instant) -> Vec<Rtcp> {
        let mut retry = vec![];

        self.pending.retain(|ssrc, p| {
            if now < p.expires {
                return true;
            }
            if !p.retry_on_timeout {
                debug!("Key frame request for SSRC {} timed out", ssrc);
                return false;
            }
            p.expires = now + self.wait;
            p.retry_on_timeout = false;
            retry.push(*ssrc);
            true
        });

        // HashMap order is arbitrary.
        retry.sort();

        retry.into_iter().map(|ssrc| self.create(ssrc)).collect()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    fn create(&mut self, ssrc: Ssrc) -> Rtcp {
        match self.kind {
            KeyframeRequestKind::Pli => Rtcp::Pli(Pli { ssrc }),
            KeyframeRequestKind::Fir => {
                let counter = self.fir_seq_no.entry(ssrc).or_insert(0);
                let seq_no = *counter;
                *counter = counter.wrapping_add(1);
                Rtcp::Fir(Fir {
                    entry: FirEntry { ssrc, seq_no },
                })
            }
        }
    }
}
