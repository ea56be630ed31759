//! Producer configuration.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::feedback::TraceEventType;
use crate::rtp_::{Pt, Rid, Ssrc};
use crate::{Producer, ProducerError, ProducerId};

/// Default time a key frame request is left outstanding before it is retried.
pub const DEFAULT_KEYFRAME_REQUEST_WAIT: Duration = Duration::from_millis(1000);

/// Default silence before a stream is considered paused.
pub const DEFAULT_PAUSE_THRESHOLD: Duration = Duration::from_millis(1500);

/// Audio or video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio media.
    Audio,
    /// Video media.
    Video,
}

impl MediaKind {
    /// Test if this is [`MediaKind::Audio`].
    pub fn is_audio(&self) -> bool {
        *self == MediaKind::Audio
    }

    /// Test if this is [`MediaKind::Video`].
    pub fn is_video(&self) -> bool {
        *self == MediaKind::Video
    }
}

/// What happens to accepted packets besides being forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TranslateMode {
    /// Forward only.
    #[default]
    Direct,
    /// Also hand packets to the [`Unpacker`][crate::transcode::Unpacker].
    UnpackAndProduce,
    /// Also hand packets to the [`FrameDecoder`][crate::transcode::FrameDecoder] and
    /// keep the last decoded frame. Required for a producer to act as a master.
    DecodeAndEncode,
}

/// Type of key frame request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyframeRequestKind {
    /// Picture Loss Indication (PLI) is a less severe request.
    #[default]
    Pli,
    /// Full Intra Request (FIR) is a more severe request.
    Fir,
}

/// A negotiated codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodecParams {
    /// Payload type of the primary stream.
    pub pt: Pt,
    /// Clock rate of the RTP timestamps.
    pub clock_rate: u32,
    /// For example `video/VP8`.
    pub mime_type: String,
    /// Payload type of the associated RTX stream, if any.
    #[serde(default)]
    pub rtx_pt: Option<Pt>,
}

/// Rewrite of a payload type on forwarded packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PtRemap {
    /// Payload type as sent by the source.
    pub pt: Pt,
    /// Payload type put on forwarded packets.
    pub mapped_pt: Pt,
}

/// One simulcast layer.
///
/// Encodings are listed from lowest to highest quality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingParams {
    /// Layer label sent in the `rtp-stream-id` header extension.
    #[serde(default)]
    pub rid: Option<Rid>,
    /// SSRC advertised by the source.
    #[serde(default)]
    pub ssrc: Option<Ssrc>,
    /// RTX SSRC advertised by the source.
    #[serde(default)]
    pub rtx_ssrc: Option<Ssrc>,
    /// SSRC used on forwarded packets.
    pub mapped_ssrc: Ssrc,
    /// Codec used by this layer, if pinned.
    #[serde(default)]
    pub pt: Option<Pt>,
}

impl EncodingParams {
    /// Creates a layer forwarded with `mapped_ssrc`.
    pub fn new(mapped_ssrc: u32) -> Self {
        EncodingParams {
            rid: None,
            ssrc: None,
            rtx_ssrc: None,
            mapped_ssrc: mapped_ssrc.into(),
            pt: None,
        }
    }

    /// Set the layer label.
    pub fn rid(mut self, rid: &str) -> Self {
        self.rid = Some(rid.into());
        self
    }

    /// Set the advertised SSRC.
    pub fn ssrc(mut self, ssrc: u32) -> Self {
        self.ssrc = Some(ssrc.into());
        self
    }

    /// Set the advertised RTX SSRC.
    pub fn rtx_ssrc(mut self, ssrc: u32) -> Self {
        self.rtx_ssrc = Some(ssrc.into());
        self
    }

    /// Pin the codec of this layer.
    pub fn pt(mut self, pt: u8) -> Self {
        self.pt = Some(pt.into());
        self
    }
}

/// Configuration of a [`Producer`].
///
/// ```
/// # use producer_ingress::{ProducerConfig, EncodingParams, MediaKind};
/// # use std::time::Instant;
/// let producer = ProducerConfig::new(MediaKind::Video)
///     .add_codec(96, 90_000, "video/VP8", Some(97))
///     .add_encoding(EncodingParams::new(5000).ssrc(1000))
///     .build(Instant::now())
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerConfig {
    kind: MediaKind,
    codecs: Vec<CodecParams>,
    #[serde(default)]
    codec_remap: Vec<PtRemap>,
    encodings: Vec<EncodingParams>,
    #[serde(default)]
    translate_mode: TranslateMode,
    #[serde(default)]
    trace_events: Vec<TraceEventType>,
    #[serde(default)]
    keyframe_request_kind: KeyframeRequestKind,
    #[serde(default = "default_keyframe_request_wait_ms")]
    keyframe_request_wait_ms: u64,
    #[serde(default = "default_pause_threshold_ms")]
    pause_threshold_ms: u64,
    #[serde(default = "default_true")]
    nack: bool,
}

fn default_keyframe_request_wait_ms() -> u64 {
    DEFAULT_KEYFRAME_REQUEST_WAIT.as_millis() as u64
}

fn default_pause_threshold_ms() -> u64 {
    DEFAULT_PAUSE_THRESHOLD.as_millis() as u64
}

fn default_true() -> bool {
    true
}

impl ProducerConfig {
    /// Creates a new config without codecs and encodings.
    pub fn new(kind: MediaKind) -> Self {
        ProducerConfig {
            kind,
            codecs: vec![],
            codec_remap: vec![],
            encodings: vec![],
            translate_mode: TranslateMode::default(),
            trace_events: vec![],
            keyframe_request_kind: KeyframeRequestKind::default(),
            keyframe_request_wait_ms: default_keyframe_request_wait_ms(),
            pause_threshold_ms: default_pause_threshold_ms(),
            nack: true,
        }
    }

    /// The media kind.
    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Add a negotiated codec.
    pub fn add_codec(
        mut self,
        pt: u8,
        clock_rate: u32,
        mime_type: &str,
        rtx_pt: Option<u8>,
    ) -> Self {
        self.codecs.push(CodecParams {
            pt: pt.into(),
            clock_rate,
            mime_type: mime_type.to_string(),
            rtx_pt: rtx_pt.map(Pt::from),
        });
        self
    }

    /// Codecs added so far.
    pub fn codecs(&self) -> &[CodecParams] {
        &self.codecs
    }

    /// Forward packets with payload type `pt` as `mapped_pt`.
    pub fn add_codec_remap(mut self, pt: u8, mapped_pt: u8) -> Self {
        self.codec_remap.push(PtRemap {
            pt: pt.into(),
            mapped_pt: mapped_pt.into(),
        });
        self
    }

    /// Payload type remappings.
    pub fn codec_remap(&self) -> &[PtRemap] {
        &self.codec_remap
    }

    /// Add a simulcast layer. Layers are added lowest quality first.
    pub fn add_encoding(mut self, encoding: EncodingParams) -> Self {
        self.encodings.push(encoding);
        self
    }

    /// Layers added so far.
    pub fn encodings(&self) -> &[EncodingParams] {
        &self.encodings
    }

    /// Set the translate mode.
    ///
    /// Defaults to [`TranslateMode::Direct`].
    pub fn set_translate_mode(mut self, mode: TranslateMode) -> Self {
        self.translate_mode = mode;
        self
    }

    /// The translate mode.
    pub fn translate_mode(&self) -> TranslateMode {
        self.translate_mode
    }

    /// Enable a trace event category.
    pub fn enable_trace_event(mut self, kind: TraceEventType) -> Self {
        if !self.trace_events.contains(&kind) {
            self.trace_events.push(kind);
        }
        self
    }

    /// Enabled trace event categories.
    pub fn trace_events(&self) -> &[TraceEventType] {
        &self.trace_events
    }

    /// Whether to ask for key frames with PLI or FIR.
    ///
    /// Defaults to [`KeyframeRequestKind::Pli`].
    pub fn set_keyframe_request_kind(mut self, kind: KeyframeRequestKind) -> Self {
        self.keyframe_request_kind = kind;
        self
    }

    /// The kind of key frame request.
    pub fn keyframe_request_kind(&self) -> KeyframeRequestKind {
        self.keyframe_request_kind
    }

    /// How long a key frame request is outstanding before it's retried. Further
    /// requests for the same SSRC during this time are coalesced.
    ///
    /// Defaults to 1 second.
    pub fn set_keyframe_request_wait(mut self, wait: Duration) -> Self {
        self.keyframe_request_wait_ms = wait.as_millis() as u64;
        self
    }

    /// The key frame request wait.
    pub fn keyframe_request_wait(&self) -> Duration {
        Duration::from_millis(self.keyframe_request_wait_ms)
    }

    /// Silence before a stream is considered paused.
    ///
    /// Defaults to 1.5 seconds.
    pub fn set_pause_threshold(mut self, threshold: Duration) -> Self {
        self.pause_threshold_ms = threshold.as_millis() as u64;
        self
    }

    /// The pause threshold.
    pub fn pause_threshold(&self) -> Duration {
        Duration::from_millis(self.pause_threshold_ms)
    }

    /// Whether to request retransmissions of missing packets.
    ///
    /// Defaults to `true`. Only has an effect for codecs with RTX.
    pub fn enable_nack(mut self, enabled: bool) -> Self {
        self.nack = enabled;
        self
    }

    /// Whether NACK is enabled.
    pub fn nack(&self) -> bool {
        self.nack
    }

    /// Create a [`Producer`] with a random id.
    pub fn build(self, now: Instant) -> Result<Producer, ProducerError> {
        Producer::new(ProducerId::new(), self, now)
    }

    /// Create a [`Producer`] with the given id.
    pub fn build_with_id(self, id: ProducerId, now: Instant) -> Result<Producer, ProducerError> {
        Producer::new(id, self, now)
    }
}
