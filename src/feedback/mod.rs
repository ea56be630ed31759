//! Turns stream signals into producer level events and upstream requests.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::{KeyframeRequestKind, MediaKind};
use crate::rtp_::{Nack, Pt, Rtcp, Ssrc};
use crate::streams::{StreamAdded, StreamListener, StreamPaused, StreamRx};
use crate::util::InstantExt;
use crate::{Event, Output};

mod keyframe;
pub(crate) use keyframe::KeyframeRequests;

/// Categories of trace events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceEventType {
    /// Every accepted RTP packet.
    Rtp,
    /// Key frames received.
    Keyframe,
    /// NACK sent upstream.
    Nack,
    /// PLI sent upstream.
    Pli,
    /// FIR sent upstream.
    Fir,
}

/// Whether the traced thing came in or went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceDirection {
    /// From the source.
    In,
    /// Towards the source.
    Out,
}

/// Details of a trace event.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum TraceInfo {
    #[serde(rename_all = "camelCase")]
    Rtp {
        ssrc: Ssrc,
        seq_no: u16,
        pt: Pt,
        is_rtx: bool,
        payload_len: usize,
    },
    #[serde(rename_all = "camelCase")]
    Keyframe {
        ssrc: Ssrc,
        seq_no: u16,
        pt: Pt,
    },
    #[serde(rename_all = "camelCase")]
    Nack {
        ssrc: Ssrc,
        seq_nos: Vec<u16>,
    },
    Pli {
        ssrc: Ssrc,
    },
    #[serde(rename_all = "camelCase")]
    Fir {
        ssrc: Ssrc,
        seq_no: u8,
    },
}

/// A trace event, only emitted for enabled categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    /// The category.
    pub kind: TraceEventType,
    /// Wallclock milliseconds since unix epoch.
    pub timestamp: u64,
    /// In or out.
    pub direction: TraceDirection,
    /// Details.
    pub info: TraceInfo,
}

/// Score of one encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerScore {
    /// Index of the encoding.
    pub encoding_idx: usize,
    /// The SSRC bound to the encoding, if any.
    pub ssrc: Option<Ssrc>,
    /// 0 to 10.
    pub score: u8,
    /// Bound and not paused.
    pub active: bool,
}

/// Event when the producer score changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerScore {
    /// Score of the highest active encoding, 0 with none.
    pub score: u8,
    /// Score of every encoding.
    pub layers: Vec<LayerScore>,
}

#[derive(Debug, Clone, Copy, Default)]
struct LayerState {
    ssrc: Option<Ssrc>,
    score: u8,
    paused: bool,
}

impl LayerState {
    fn active(&self) -> bool {
        self.ssrc.is_some() && !self.paused
    }
}

/// Counters of requests sent upstream.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FeedbackStats {
    pub nacks: u64,
    pub plis: u64,
    pub firs: u64,
}

/// The feedback orchestrator.
///
/// Streams talk to this through [`StreamListener`]. Everything it produces is
/// queued in order and drained through `poll_output`.
#[derive(Debug)]
pub(crate) struct Feedback {
    kind: MediaKind,
    layers: Vec<LayerState>,
    score: u8,
    keyframes: KeyframeRequests,
    trace_events: HashSet<TraceEventType>,
    queue: VecDeque<Output>,
    stats: FeedbackStats,
}

impl Feedback {
    pub fn new(
        kind: MediaKind,
        layer_count: usize,
        keyframe_kind: KeyframeRequestKind,
        keyframe_wait: Duration,
        trace_events: &[TraceEventType],
    ) -> Self {
        Feedback {
            kind,
            layers: vec![LayerState::default(); layer_count],
            score: 0,
            keyframes: KeyframeRequests::new(keyframe_kind, keyframe_wait),
            trace_events: trace_events.iter().copied().collect(),
            queue: VecDeque::new(),
            stats: FeedbackStats::default(),
        }
    }

    pub fn push_event(&mut self, event: Event) {
        self.queue.push_back(Output::Event(event));
    }

    pub fn poll_output(&mut self) -> Option<Output> {
        self.queue.pop_front()
    }

    pub fn score(&self) -> u8 {
        self.score
    }

    pub fn stats(&self) -> FeedbackStats {
        self.stats
    }

    pub fn set_trace_events(&mut self, kinds: &[TraceEventType]) {
        self.trace_events = kinds.iter().copied().collect();
    }

    pub fn trace_events(&self) -> Vec<TraceEventType> {
        let mut v: Vec<_> = self.trace_events.iter().copied().collect();
        v.sort_by_key(|k| *k as u8);
        v
    }

    pub fn is_tracing(&self, kind: TraceEventType) -> bool {
        self.trace_events.contains(&kind)
    }

    /// Emit a trace event if the category is enabled.
    pub fn trace(&mut self, now: Instant, direction: TraceDirection, info: TraceInfo) {
        let kind = match &info {
            TraceInfo::Rtp { .. } => TraceEventType::Rtp,
            TraceInfo::Keyframe { .. } => TraceEventType::Keyframe,
            TraceInfo::Nack { .. } => TraceEventType::Nack,
            TraceInfo::Pli { .. } => TraceEventType::Pli,
            TraceInfo::Fir { .. } => TraceEventType::Fir,
        };

        if !self.is_tracing(kind) {
            return;
        }

        self.push_event(Event::Trace(TraceEvent {
            kind,
            timestamp: now.to_unix_duration().as_millis() as u64,
            direction,
            info,
        }));
    }

    /// Ask the source for a key frame on `ssrc`, unless one is already outstanding.
    pub fn request_key_frame(&mut self, now: Instant, ssrc: Ssrc) {
        if self.kind.is_audio() {
            return;
        }

        if let Some(rtcp) = self.keyframes.request(now, ssrc) {
            self.send_keyframe_request(now, rtcp);
        }
    }

    pub fn keyframe_received(&mut self, ssrc: Ssrc) {
        self.keyframes.keyframe_received(ssrc);
    }

    fn send_keyframe_request(&mut self, now: Instant, rtcp: Rtcp) {
        match &rtcp {
            Rtcp::Pli(pli) => {
                self.stats.plis += 1;
                debug!("Send PLI for SSRC {}", pli.ssrc);
                self.trace(now, TraceDirection::Out, TraceInfo::Pli { ssrc: pli.ssrc });
            }
            Rtcp::Fir(fir) => {
                self.stats.firs += 1;
                debug!("Send FIR for SSRC {}", fir.entry.ssrc);
                self.trace(
                    now,
                    TraceDirection::Out,
                    TraceInfo::Fir {
                        ssrc: fir.entry.ssrc,
                        seq_no: fir.entry.seq_no,
                    },
                );
            }
            _ => {}
        }
        self.queue.push_back(Output::Rtcp(rtcp));
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        for rtcp in self.keyframes.handle_timeout(now) {
            self.send_keyframe_request(now, rtcp);
        }

        self.evaluate_score();
    }

    /// Score of the highest encoding index among active layers, 0 with none.
    fn aggregate_score(&self) -> u8 {
        self.layers
            .iter()
            .rev()
            .find(|l| l.active())
            .map(|l| l.score)
            .unwrap_or(0)
    }

    fn evaluate_score(&mut self) {
        let score = self.aggregate_score();
        if score == self.score {
            return;
        }

        debug!("Producer score {} -> {}", self.score, score);
        self.score = score;

        let layers = self.layer_scores();
        self.push_event(Event::Score(ProducerScore { score, layers }));
    }

    pub fn layer_scores(&self) -> Vec<LayerScore> {
        self.layers
            .iter()
            .enumerate()
            .map(|(encoding_idx, l)| LayerScore {
                encoding_idx,
                ssrc: l.ssrc,
                score: l.score,
                active: l.active(),
            })
            .collect()
    }

    /// Forget all streams and pending output.
    pub fn clear(&mut self) {
        self.layers.iter_mut().for_each(|l| *l = LayerState::default());
        self.keyframes.clear();
        self.queue.clear();
    }
}

impl StreamListener for Feedback {
    fn on_new_stream(&mut self, stream: &StreamRx) {
        if let Some(l) = self.layers.get_mut(stream.encoding_idx()) {
            *l = LayerState {
                ssrc: Some(stream.ssrc()),
                score: stream.score(),
                paused: false,
            };
        }

        self.push_event(Event::StreamAdded(StreamAdded {
            encoding_idx: stream.encoding_idx(),
            ssrc: stream.ssrc(),
            mapped_ssrc: stream.mapped_ssrc(),
            rid: stream.rid(),
        }));
    }

    fn on_stream_score(&mut self, encoding_idx: usize, score: u8, prev: u8) {
        trace!(
            "Stream score encoding {} {} -> {}",
            encoding_idx,
            prev,
            score
        );

        if let Some(l) = self.layers.get_mut(encoding_idx) {
            l.score = score;
        }

        self.evaluate_score();
    }

    fn on_stream_paused(&mut self, encoding_idx: usize, paused: bool) {
        let Some(l) = self.layers.get_mut(encoding_idx) else {
            return;
        };
        l.paused = paused;
        let ssrc = l.ssrc;

        if let Some(ssrc) = ssrc {
            self.push_event(Event::StreamPaused(StreamPaused {
                encoding_idx,
                ssrc,
                paused,
            }));
        }

        self.evaluate_score();
    }

    fn on_resend_packets(&mut self, now: Instant, ssrc: Ssrc, seqs: &[u16]) {
        let nack = Nack::from_seq_numbers(ssrc, seqs);

        trace!("Created feedback NACK: {:?}", nack);
        self.stats.nacks += 1;

        self.trace(
            now,
            TraceDirection::Out,
            TraceInfo::Nack {
                ssrc,
                seq_nos: seqs.to_vec(),
            },
        );

        self.queue.push_back(Output::Rtcp(Rtcp::Nack(nack)));
    }

    fn on_key_frame_needed(&mut self, now: Instant, ssrc: Ssrc) {
        self.request_key_frame(now, ssrc);
    }

    fn on_send_rtcp(&mut self, rtcp: Rtcp) {
        self.queue.push_back(Output::Rtcp(rtcp));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn feedback(layers: usize) -> Feedback {
        Feedback::new(
            MediaKind::Video,
            layers,
            KeyframeRequestKind::Pli,
            Duration::from_millis(1000),
            &[],
        )
    }

    fn bind(f: &mut Feedback, idx: usize, ssrc: u32) {
        let l = &mut f.layers[idx];
        l.ssrc = Some(ssrc.into());
    }

    fn scores(f: &mut Feedback) -> Vec<u8> {
        let mut v = vec![];
        while let Some(o) = f.poll_output() {
            if let Output::Event(Event::Score(s)) = o {
                v.push(s.score);
            }
        }
        v
    }

    #[test]
    fn aggregate_is_highest_active_layer() {
        let mut f = feedback(2);
        bind(&mut f, 0, 1);
        bind(&mut f, 1, 2);

        f.on_stream_score(0, 10, 0);
        f.on_stream_score(1, 10, 0);
        assert_eq!(scores(&mut f), vec![10]);

        // low layer going to 0 does not change anything
        f.on_stream_paused(0, true);
        f.on_stream_score(0, 0, 10);
        assert_eq!(scores(&mut f), Vec::<u8>::new());

        // high layer degrading does
        f.on_stream_score(1, 7, 10);
        assert_eq!(scores(&mut f), vec![7]);

        // no active layer left
        f.on_stream_paused(1, true);
        assert_eq!(scores(&mut f), vec![0]);
        assert_eq!(f.score(), 0);
    }

    #[test]
    fn aggregate_neutral_is_zero() {
        let f = feedback(3);
        assert_eq!(f.aggregate_score(), 0);
    }

    #[test]
    fn audio_ignores_key_frame_requests() {
        let mut f = Feedback::new(
            MediaKind::Audio,
            1,
            KeyframeRequestKind::Pli,
            Duration::from_millis(1000),
            &[],
        );
        f.request_key_frame(Instant::now(), 1.into());
        assert!(f.poll_output().is_none());
    }

    #[test]
    fn trace_gating() {
        let now = Instant::now();
        let mut f = feedback(1);

        f.on_resend_packets(now, 1.into(), &[1, 2]);
        assert!(matches!(f.poll_output(), Some(Output::Rtcp(Rtcp::Nack(_)))));
        assert!(f.poll_output().is_none());

        f.set_trace_events(&[TraceEventType::Nack]);
        f.on_resend_packets(now, 1.into(), &[1, 2]);
        match f.poll_output() {
            Some(Output::Event(Event::Trace(t))) => {
                assert_eq!(t.kind, TraceEventType::Nack);
                assert_eq!(t.direction, TraceDirection::Out);
            }
            o => panic!("expected trace, got {:?}", o),
        }
        assert!(matches!(f.poll_output(), Some(Output::Rtcp(Rtcp::Nack(_)))));
        assert_eq!(f.stats().nacks, 2);
    }
}
