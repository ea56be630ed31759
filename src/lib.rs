//! A Sans I/O ingress stage for RTP producers.
//!
//! A [`Producer`] is the receiving side of one media source in a selective forwarding
//! unit. It takes already parsed RTP packets from the source, figures out which
//! negotiated encoding (simulcast layer) each packet belongs to, turns retransmissions
//! (RTX) back into the packets they repair, and hands the result on with the SSRC and
//! payload type the rest of the router expects.
//!
//! Towards the source it produces the feedback a receiver is supposed to produce:
//! receiver reports, NACK for missing packets and key frame requests (PLI or FIR).
//! Towards the router it produces events: forwarded packets, score changes, streams
//! being bound and paused, video orientation changes and opt-in trace events.
//!
//! # Sans I/O
//!
//! The producer does no network talking and has no internal threads or async tasks.
//! Everything happens inside calls to the public API. Time is input like anything else.
//!
//! Input to the producer is:
//!
//! 1. RTP packets via [`Producer::handle_rtp()`].
//! 2. Timeouts via [`Producer::handle_timeout()`].
//! 3. Operations such as [`Producer::request_key_frame()`].
//!
//! Output from the producer is polled with [`Producer::poll_output()`] and is one of:
//!
//! 1. [`Output::Event`] for the router.
//! 2. [`Output::Rtcp`] to be serialized and sent to the source.
//! 3. [`Output::Timeout`] when there is nothing more to do until that time.
//!
//! # Run loop
//!
//! ```no_run
//! # use producer_ingress::*;
//! # use producer_ingress::rtp::RtpPacket;
//! # use std::time::Instant;
//! let mut producer = ProducerConfig::new(MediaKind::Video)
//!     .add_codec(96, 90_000, "video/VP8", Some(97))
//!     .add_encoding(EncodingParams::new(5000).ssrc(1000).rtx_ssrc(1001))
//!     .build(Instant::now())
//!     .unwrap();
//!
//! loop {
//!     let timeout = match producer.poll_output() {
//!         Output::Timeout(v) => v,
//!         Output::Rtcp(rtcp) => {
//!             // TODO: Serialize and send to the source.
//!             continue; // poll again
//!         }
//!         Output::Event(e) => {
//!             // TODO: Forward packets, update consumers.
//!             continue; // poll again
//!         }
//!     };
//!
//!     // TODO: Wait for either `timeout` or the next packet from the source.
//!     let packet: Option<RtpPacket> = todo!();
//!
//!     match packet {
//!         Some(p) => {
//!             producer.handle_rtp(Instant::now(), p);
//!         }
//!         None => producer.handle_timeout(Instant::now()),
//!     }
//! }
//! ```
//!
//! # Encodings
//!
//! The negotiated encodings are given lowest quality first. A packet is attributed to
//! an encoding by, in order:
//!
//! 1. The SSRC, if the encoding advertises one.
//! 2. The `rid` header extension (`repaired-rid` for RTX).
//! 3. Elimination, if there is only one encoding and it advertises no SSRC.
//!
//! An encoding is bound to the first SSRC attributed to it and is never rebound.
//! RTX packets never bind an encoding, they can only be associated with one
//! that already received a primary packet.
//!
//! # Score
//!
//! Each bound stream has a score from 0 to 10 derived from its packet loss. The
//! producer score is the score of the highest quality encoding that is bound and not
//! paused, or 0 if there is none. [`Event::Score`] is emitted when it changes.
//!
//! # Master and slaves
//!
//! Producers in [`TranslateMode::DecodeAndEncode`] can be masters. Their slaves use the
//! master's decoded frames instead of decoding their own. Since producers refer to each
//! other by id, the relation lives in the [`Producers`] arena.

#![forbid(unsafe_code)]
#![allow(clippy::new_without_default)]
#![allow(clippy::len_without_is_empty)]
#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;

mod codec;
pub use codec::Codec;

mod config;
pub use config::{CodecParams, EncodingParams, KeyframeRequestKind, MediaKind};
pub use config::{ProducerConfig, PtRemap, TranslateMode};
pub use config::{DEFAULT_KEYFRAME_REQUEST_WAIT, DEFAULT_PAUSE_THRESHOLD};

mod encoding;
use encoding::EncodingTable;

mod fanout;

mod feedback;
use feedback::Feedback;
pub use feedback::{LayerScore, ProducerScore, TraceDirection};
pub use feedback::{TraceEvent, TraceEventType, TraceInfo};

mod normalize;

mod producers;
pub use producers::Producers;

#[path = "rtp/mod.rs"]
mod rtp_;
use rtp_::{PacketError, Rtcp, RtpPacket, Ssrc, VideoOrientation};

/// Low level RTP and RTCP types.
pub mod rtp {
    pub use crate::rtp_::{ExtensionValues, Pt, Rid, RtpHeader, RtpPacket};
    pub use crate::rtp_::{Fir, FirEntry, Nack, NackEntry, Pli};
    pub use crate::rtp_::{ReceiverReport, ReceptionReport, Rtcp};
    pub use crate::rtp_::{SeqNo, Ssrc, VideoOrientation};
}

pub use rtp_::ProducerId;

pub mod stats;
use stats::{DiscardCounters, ProducerSnapshot};

mod streams;
use streams::Streams;
pub use streams::{MediaPacket, StreamAdded, StreamPaused, MAX_SCORE};

pub mod transcode;
use transcode::{FrameDecoder, SharedFrame, Unpacker};

mod util;
use util::not_happening;

/// Various error types.
pub mod error {
    pub use crate::rtp_::PacketError;
}

/// Interval of the maintenance timer.
pub const TICK: Duration = Duration::from_millis(40);

/// Errors from configuring producers and relating them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProducerError {
    /// The codecs and encodings of a [`ProducerConfig`] don't add up.
    #[error("configuration mismatch: {0}")]
    ConfigurationMismatch(String),

    /// A master/slave relation that isn't allowed.
    #[error("invalid relationship: {0}")]
    InvalidRelationship(String),

    /// No producer with this id.
    #[error("unknown producer: {0}")]
    UnknownProducer(ProducerId),

    /// A producer with this id already exists.
    #[error("producer already exists: {0}")]
    ProducerExists(ProducerId),
}

/// Events produced by [`Producer::poll_output()`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Event {
    /// An accepted packet to forward.
    RtpPacket(MediaPacket),

    /// The producer score changed.
    Score(ProducerScore),

    /// An encoding got bound to an incoming SSRC.
    StreamAdded(StreamAdded),

    /// Whether an incoming encoded stream is paused.
    ///
    /// This means the stream has not received any data for some time (default 1.5 seconds).
    StreamPaused(StreamPaused),

    /// The video orientation signalled by the source changed.
    VideoOrientationChange(VideoOrientation),

    /// Debug output of packets and feedback.
    ///
    /// Only for categories enabled with [`Producer::enable_trace_events()`].
    Trace(TraceEvent),

    /// The master of this producer closed. The producer is no longer a slave.
    MasterClosed(ProducerId),
}

/// Output produced by [`Producer::poll_output()`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// When the [`Producer`] next expects a [`Producer::handle_timeout()`].
    Timeout(Instant),

    /// Something for the router.
    Event(Event),

    /// Feedback to send to the source.
    Rtcp(Rtcp),
}

/// What happened to a packet given to [`Producer::handle_rtp()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveResult {
    /// Accepted on a primary stream.
    Media,
    /// Accepted as a repaired retransmission.
    Retransmission,
    /// Dropped.
    Discarded(PacketError),
}

impl ReceiveResult {
    /// Whether the packet was accepted.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, ReceiveResult::Discarded(_))
    }
}

/// The ingress stage of one media source.
///
/// Created from a [`ProducerConfig`].
pub struct Producer {
    id: ProducerId,
    alive: bool,
    table: EncodingTable,
    streams: Streams,
    feedback: Feedback,
    translate_mode: TranslateMode,
    video_orientation: Option<VideoOrientation>,
    unpacker: Option<Box<dyn Unpacker>>,
    decoder: Option<Box<dyn FrameDecoder>>,
    last_frame: Option<SharedFrame>,
    /// Set while this is a slave. Frames come from the master.
    upstream: bool,
    next_tick: Option<Instant>,
    discarded: DiscardCounters,
}

impl Producer {
    pub(crate) fn new(
        id: ProducerId,
        config: ProducerConfig,
        now: Instant,
    ) -> Result<Self, ProducerError> {
        let table = EncodingTable::new(&config)?;

        let streams = Streams::new(table.len(), config.nack(), config.pause_threshold());

        let feedback = Feedback::new(
            config.kind(),
            table.len(),
            config.keyframe_request_kind(),
            config.keyframe_request_wait(),
            config.trace_events(),
        );

        info!(
            "New {:?} producer {} with {} encodings",
            config.kind(),
            id,
            table.len()
        );

        Ok(Producer {
            id,
            alive: true,
            table,
            streams,
            feedback,
            translate_mode: config.translate_mode(),
            video_orientation: None,
            unpacker: None,
            decoder: None,
            last_frame: None,
            upstream: false,
            next_tick: Some(now + TICK),
            discarded: DiscardCounters::default(),
        })
    }

    /// The id of this producer.
    pub fn id(&self) -> ProducerId {
        self.id
    }

    /// Audio or video.
    pub fn kind(&self) -> MediaKind {
        self.table.kind()
    }

    /// What happens to accepted packets besides being forwarded.
    pub fn translate_mode(&self) -> TranslateMode {
        self.translate_mode
    }

    /// Whether the producer is still open.
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Current producer score, 0 to 10.
    pub fn score(&self) -> u8 {
        self.feedback.score()
    }

    /// Score of each encoding.
    pub fn layer_scores(&self) -> Vec<LayerScore> {
        self.feedback.layer_scores()
    }

    /// Worst fraction lost (in 1/256) over the active streams.
    pub fn worst_fraction_lost(&self) -> u8 {
        self.streams.worst_fraction_lost()
    }

    /// Last video orientation signalled by the source.
    pub fn video_orientation(&self) -> Option<VideoOrientation> {
        self.video_orientation
    }

    /// Last frame from the [`FrameDecoder`].
    ///
    /// Always `None` for a slave, see [`Producers::last_frame()`].
    pub fn last_frame(&self) -> Option<SharedFrame> {
        self.last_frame.clone()
    }

    /// Whether this producer is the slave of another.
    pub fn is_slave(&self) -> bool {
        self.upstream
    }

    /// Set the receiver of packets in [`TranslateMode::UnpackAndProduce`].
    pub fn set_unpacker(&mut self, unpacker: Box<dyn Unpacker>) {
        self.unpacker = Some(unpacker);
    }

    /// Set the receiver of packets in [`TranslateMode::DecodeAndEncode`].
    pub fn set_decoder(&mut self, decoder: Box<dyn FrameDecoder>) {
        self.decoder = Some(decoder);
    }

    /// Replace the enabled trace event categories.
    pub fn enable_trace_events(&mut self, kinds: &[TraceEventType]) {
        debug!("Producer {} trace events: {:?}", self.id, kinds);
        self.feedback.set_trace_events(kinds);
    }

    /// Enabled trace event categories.
    pub fn trace_events(&self) -> Vec<TraceEventType> {
        self.feedback.trace_events()
    }

    /// Take one packet from the source.
    ///
    /// Accepted packets are emitted as [`Event::RtpPacket`] in primary shape with the
    /// internal SSRC and remapped payload type. Feedback caused by the packet is queued
    /// in the order it happened.
    pub fn handle_rtp(&mut self, now: Instant, packet: RtpPacket) -> ReceiveResult {
        if !self.alive {
            return ReceiveResult::Discarded(PacketError::Closed);
        }

        let ssrc = packet.header.ssrc;

        match self.do_handle_rtp(now, packet) {
            Ok(r) => r,
            Err(e) => {
                match e {
                    PacketError::UnknownStream(_) => self.discarded.unknown_stream += 1,
                    PacketError::UnknownPayloadType(_) => {
                        self.discarded.unknown_payload_type += 1
                    }
                    PacketError::MalformedRedundancyPayload(_) => {
                        self.discarded.malformed_rtx += 1
                    }
                    PacketError::Duplicate => self.discarded.duplicate += 1,
                    PacketError::Closed => {}
                }
                trace!("Discard packet on SSRC {}: {}", ssrc, e);
                ReceiveResult::Discarded(e)
            }
        }
    }

    fn do_handle_rtp(
        &mut self,
        now: Instant,
        packet: RtpPacket,
    ) -> Result<ReceiveResult, PacketError> {
        let pt = packet.header.payload_type;
        let is_rtx = self.table.is_rtx_pt(pt);

        if !is_rtx && self.table.codec(pt).is_none() {
            return Err(PacketError::UnknownPayloadType(pt));
        }

        let idx = self
            .streams
            .resolve(&self.table, &packet.header, is_rtx, &mut self.feedback)?;

        let (ssrc, mapped_ssrc) = self
            .streams
            .stream(idx)
            .map(|s| (s.ssrc(), s.mapped_ssrc()))
            .ok_or(PacketError::UnknownStream(packet.header.ssrc))?;

        let in_seq = packet.header.sequence_number;
        let in_ssrc = packet.header.ssrc;
        let in_pt = packet.header.payload_type;
        let in_len = packet.payload.len();

        let packet = if is_rtx {
            normalize::repair(&self.table, packet, ssrc)?
        } else {
            packet
        };

        let pt = packet.header.payload_type;
        let (clock_rate, codec) = self
            .table
            .codec(pt)
            .map(|c| (c.clock_rate, c.codec))
            .ok_or(PacketError::UnknownPayloadType(pt))?;

        // Every resolved packet counts for orientation, duplicates included.
        if let Some(o) = packet.header.ext_vals.video_orientation {
            self.update_video_orientation(o);
        }

        let stream = self
            .streams
            .stream_mut(idx)
            .ok_or(PacketError::UnknownStream(in_ssrc))?;

        let seq_no = stream
            .receive(
                now,
                &packet.header,
                packet.payload.len(),
                clock_rate,
                is_rtx,
                &mut self.feedback,
            )
            .ok_or(PacketError::Duplicate)?;

        self.feedback.trace(
            now,
            TraceDirection::In,
            TraceInfo::Rtp {
                ssrc: in_ssrc,
                seq_no: in_seq,
                pt: in_pt,
                is_rtx,
                payload_len: in_len,
            },
        );

        let keyframe = self.kind().is_video() && codec.is_keyframe(&packet.payload);
        if keyframe {
            self.feedback.keyframe_received(ssrc);
            self.feedback.trace(
                now,
                TraceDirection::In,
                TraceInfo::Keyframe {
                    ssrc,
                    seq_no: packet.header.sequence_number,
                    pt,
                },
            );
        }

        let packet = normalize::mangle(&self.table, packet, mapped_ssrc);

        let media = MediaPacket {
            encoding_idx: idx,
            seq_no,
            repaired: is_rtx,
            keyframe,
            packet,
        };

        self.translate(&media);

        self.feedback.push_event(Event::RtpPacket(media));

        Ok(if is_rtx {
            ReceiveResult::Retransmission
        } else {
            ReceiveResult::Media
        })
    }

    fn update_video_orientation(&mut self, o: VideoOrientation) {
        if !self.kind().is_video() || self.video_orientation == Some(o) {
            return;
        }
        debug!("Producer {} video orientation: {:?}", self.id, o);
        self.video_orientation = Some(o);
        self.feedback.push_event(Event::VideoOrientationChange(o));
    }

    fn translate(&mut self, packet: &MediaPacket) {
        match self.translate_mode {
            TranslateMode::Direct => {}
            TranslateMode::UnpackAndProduce => {
                if let Some(u) = &mut self.unpacker {
                    u.unpack(packet);
                }
            }
            TranslateMode::DecodeAndEncode => {
                if self.upstream {
                    return;
                }
                if let Some(d) = &mut self.decoder {
                    if let Some(frame) = d.decode(packet) {
                        self.last_frame = Some(frame.into());
                    }
                }
            }
        }
    }

    /// Ask the source for a key frame on the encoding forwarded as `mapped_ssrc`.
    ///
    /// Requests for an SSRC with one already outstanding are coalesced. Returns `false`
    /// if no encoding uses `mapped_ssrc` or the source SSRC isn't known yet.
    /// Audio producers ignore this.
    pub fn request_key_frame(&mut self, now: Instant, mapped_ssrc: Ssrc) -> bool {
        if !self.alive {
            return false;
        }

        let ssrc = self
            .streams
            .stream_by_mapped_ssrc(mapped_ssrc)
            .map(|s| s.ssrc())
            .or_else(|| {
                let idx = self.table.layer_by_mapped_ssrc(mapped_ssrc)?;
                self.table.layer(idx)?.ssrc
            });

        let Some(ssrc) = ssrc else {
            debug!("No source SSRC for key frame request on {}", mapped_ssrc);
            return false;
        };

        self.feedback.request_key_frame(now, ssrc);
        true
    }

    /// Drive time forward.
    ///
    /// Runs the maintenance of all streams (pause detection, NACK, receiver reports,
    /// scores) and key frame request retries when the tick is due.
    pub fn handle_timeout(&mut self, now: Instant) {
        let Some(tick) = self.next_tick else {
            return;
        };
        if now < tick {
            return;
        }

        self.streams.handle_timeout(now, &mut self.feedback);
        self.feedback.handle_timeout(now);

        self.next_tick = Some(now + TICK);
    }

    /// When the producer next wants [`Producer::handle_timeout()`]. `None` once closed.
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.next_tick
    }

    /// Poll the producer for output.
    ///
    /// The user is expected to continuously call this and deal with the output until
    /// it is an [`Output::Timeout`]. After that no further output is produced until
    /// the timeout is reached, or a new packet is handled.
    pub fn poll_output(&mut self) -> Output {
        if !self.alive {
            return Output::Timeout(not_happening());
        }

        if let Some(o) = self.feedback.poll_output() {
            match &o {
                Output::Event(Event::RtpPacket(_)) | Output::Event(Event::Trace(_)) => {
                    trace!("{:?}", o)
                }
                _ => debug!("{:?}", o),
            }
            return o;
        }

        Output::Timeout(self.next_tick.unwrap_or_else(not_happening))
    }

    /// Read-only state of the producer.
    pub fn snapshot(&self) -> ProducerSnapshot {
        let stats = self.feedback.stats();

        ProducerSnapshot {
            id: self.id,
            kind: self.kind(),
            translate_mode: self.translate_mode,
            score: self.score(),
            layers: self.layer_scores(),
            streams: self.streams.streams().map(|s| s.snapshot()).collect(),
            video_orientation: self.video_orientation,
            trace_events: self.trace_events(),
            discarded: self.discarded,
            nacks: stats.nacks,
            plis: stats.plis,
            firs: stats.firs,
            has_frame: self.last_frame.is_some(),
            master: None,
            closed: !self.alive,
        }
    }

    /// Close the producer.
    ///
    /// The timer stops, streams are released and pending output is dropped. All
    /// further packets are discarded.
    ///
    /// For a producer owned by [`Producers`] prefer [`Producers::close()`]. Closing
    /// it here is picked up by the arena on its next mutating call.
    pub fn close(&mut self) {
        self.stop_timer();

        if !self.alive {
            return;
        }
        self.alive = false;

        self.streams.clear();
        self.feedback.clear();
        self.unpacker = None;
        self.decoder = None;
        self.last_frame = None;

        info!("Producer {} closed", self.id);
    }

    pub(crate) fn stop_timer(&mut self) {
        self.next_tick = None;
    }

    pub(crate) fn set_upstream(&mut self, upstream: bool) {
        self.upstream = upstream;
    }

    pub(crate) fn on_master_closed(&mut self, master: ProducerId) {
        if !self.upstream {
            return;
        }
        self.upstream = false;
        if !self.alive {
            return;
        }
        debug!("Producer {} lost master {}", self.id, master);
        self.feedback.push_event(Event::MasterClosed(master));
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.id)
            .field("alive", &self.alive)
            .field("kind", &self.kind())
            .field("translate_mode", &self.translate_mode)
            .field("score", &self.score())
            .field("slave", &self.upstream)
            .finish()
    }
}
