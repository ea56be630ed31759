#![allow(unused)]
use std::ops::{Deref, DerefMut};
use std::sync::Once;
use std::time::{Duration, Instant};

use producer_ingress::rtp::{ExtensionValues, Rtcp, RtpHeader, RtpPacket, Ssrc};
use producer_ingress::{Event, MediaPacket, Output, Producer, ProducerConfig, ReceiveResult};

/// VP8 payload descriptor starting a key frame.
pub const VP8_KEYFRAME: &[u8] = &[0x10, 0x9c, 0x01, 0x2a];

/// VP8 payload descriptor starting a delta frame.
pub const VP8_DELTA: &[u8] = &[0x10, 0x9d, 0x01, 0x2a];

pub struct TestProducer {
    pub producer: Producer,
    pub start: Instant,
    pub now: Instant,
    pub events: Vec<(Instant, Event)>,
    pub rtcp: Vec<(Instant, Rtcp)>,
}

impl TestProducer {
    pub fn new(config: ProducerConfig) -> Self {
        let now = Instant::now();
        let producer = config.build(now).unwrap();
        TestProducer {
            producer,
            start: now,
            now,
            events: vec![],
            rtcp: vec![],
        }
    }

    pub fn duration(&self) -> Duration {
        self.now - self.start
    }

    /// Handle a packet at the current time and drain the output.
    pub fn receive(&mut self, packet: RtpPacket) -> ReceiveResult {
        let r = self.producer.handle_rtp(self.now, packet);
        self.drain();
        r
    }

    /// Move time forward, firing every timeout on the way.
    pub fn advance(&mut self, d: Duration) {
        let end = self.now + d;
        while let Some(t) = self.producer.poll_timeout() {
            if t > end {
                break;
            }
            self.now = t;
            self.producer.handle_timeout(t);
            self.drain();
        }
        self.now = end;
    }

    pub fn drain(&mut self) {
        loop {
            match self.producer.poll_output() {
                Output::Timeout(_) => break,
                Output::Event(e) => self.events.push((self.now, e)),
                Output::Rtcp(r) => self.rtcp.push((self.now, r)),
            }
        }
    }

    pub fn forwarded(&self) -> Vec<&MediaPacket> {
        self.events
            .iter()
            .filter_map(|(_, e)| match e {
                Event::RtpPacket(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn scores(&self) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|(_, e)| match e {
                Event::Score(s) => Some(s.score),
                _ => None,
            })
            .collect()
    }

    pub fn nacked(&self) -> Vec<u16> {
        self.rtcp
            .iter()
            .filter_map(|(_, r)| match r {
                Rtcp::Nack(n) => Some(n.seq_numbers().collect::<Vec<_>>()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn keyframe_requests(&self) -> Vec<(Instant, Rtcp)> {
        self.rtcp
            .iter()
            .filter(|(_, r)| r.is_keyframe_request())
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.rtcp.clear();
    }
}

impl Deref for TestProducer {
    type Target = Producer;

    fn deref(&self) -> &Self::Target {
        &self.producer
    }
}

impl DerefMut for TestProducer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.producer
    }
}

pub fn rtp(ssrc: u32, pt: u8, seq: u16, payload: &[u8]) -> RtpPacket {
    RtpPacket {
        header: RtpHeader {
            ssrc: ssrc.into(),
            payload_type: pt.into(),
            sequence_number: seq,
            timestamp: seq as u32 * 3000,
            ..Default::default()
        },
        payload: payload.to_vec(),
    }
}

pub fn rtp_rid(ssrc: u32, pt: u8, seq: u16, rid: &str, payload: &[u8]) -> RtpPacket {
    let mut p = rtp(ssrc, pt, seq, payload);
    p.header.ext_vals = ExtensionValues {
        rid: Some(rid.into()),
        ..Default::default()
    };
    p
}

/// An RTX packet carrying `orig_seq` in front of `payload`.
pub fn rtx(ssrc: u32, pt: u8, seq: u16, orig_seq: u16, payload: &[u8]) -> RtpPacket {
    let mut body = orig_seq.to_be_bytes().to_vec();
    body.extend_from_slice(payload);
    rtp(ssrc, pt, seq, &body)
}

pub fn init_log() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    static START: Once = Once::new();

    START.call_once(|| {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(env_filter)
            .init();
    });
}
