//! The negotiated codecs and simulcast layers of a producer.

use std::collections::{HashMap, HashSet};

use crate::codec::Codec;
use crate::config::{CodecParams, EncodingParams, MediaKind, ProducerConfig};
use crate::rtp_::{Pt, Rid, Ssrc};
use crate::ProducerError;

/// A codec as used by the table.
#[derive(Debug, Clone)]
pub(crate) struct CodecEntry {
    pub pt: Pt,
    pub rtx_pt: Option<Pt>,
    pub clock_rate: u32,
    pub codec: Codec,
}

/// Immutable mapping from payload types and layers to stream slots.
///
/// The index of a layer is also the index of its stream slot and its priority
/// in score aggregation, higher index being higher quality.
#[derive(Debug)]
pub(crate) struct EncodingTable {
    kind: MediaKind,
    codecs: Vec<CodecEntry>,
    /// RTX payload type -> primary payload type.
    rtx_pts: HashMap<Pt, Pt>,
    remap: HashMap<Pt, Pt>,
    layers: Vec<EncodingParams>,
}

fn mismatch(msg: impl Into<String>) -> ProducerError {
    ProducerError::ConfigurationMismatch(msg.into())
}

impl EncodingTable {
    pub fn new(config: &ProducerConfig) -> Result<Self, ProducerError> {
        if config.codecs().is_empty() {
            return Err(mismatch("no codecs"));
        }
        if config.encodings().is_empty() {
            return Err(mismatch("no encodings"));
        }

        let mut codecs = Vec::with_capacity(config.codecs().len());
        let mut rtx_pts = HashMap::new();

        for CodecParams {
            pt,
            clock_rate,
            mime_type,
            rtx_pt,
        } in config.codecs()
        {
            if codecs.iter().any(|c: &CodecEntry| c.pt == *pt) {
                return Err(mismatch(format!("duplicate payload type {}", pt)));
            }
            if *clock_rate == 0 {
                return Err(mismatch(format!("zero clock rate for payload type {}", pt)));
            }
            if let Some(rtx) = rtx_pt {
                if rtx_pts.insert(*rtx, *pt).is_some() || rtx == pt {
                    return Err(mismatch(format!("duplicate RTX payload type {}", rtx)));
                }
            }
            codecs.push(CodecEntry {
                pt: *pt,
                rtx_pt: *rtx_pt,
                clock_rate: *clock_rate,
                codec: Codec::from_mime_type(mime_type),
            });
        }

        if let Some(c) = codecs.iter().find(|c| rtx_pts.contains_key(&c.pt)) {
            return Err(mismatch(format!(
                "payload type {} is both primary and RTX",
                c.pt
            )));
        }

        let mut remap = HashMap::new();
        for r in config.codec_remap() {
            if !codecs.iter().any(|c| c.pt == r.pt) {
                return Err(mismatch(format!("remap of unknown payload type {}", r.pt)));
            }
            if remap.insert(r.pt, r.mapped_pt).is_some() {
                return Err(mismatch(format!("payload type {} remapped twice", r.pt)));
            }
        }

        let layers = config.encodings().to_vec();
        let multi = layers.len() > 1;

        let mut ssrcs = HashSet::new();
        let mut mapped = HashSet::new();
        let mut rids = HashSet::new();

        for (idx, l) in layers.iter().enumerate() {
            for ssrc in l.ssrc.iter().chain(l.rtx_ssrc.iter()) {
                if !ssrcs.insert(*ssrc) {
                    return Err(mismatch(format!("duplicate SSRC {}", ssrc)));
                }
            }
            if !mapped.insert(l.mapped_ssrc) {
                return Err(mismatch(format!("duplicate mapped SSRC {}", l.mapped_ssrc)));
            }
            if let Some(rid) = l.rid {
                if !rids.insert(rid) {
                    return Err(mismatch(format!("duplicate rid {}", rid)));
                }
            }
            if multi && l.ssrc.is_none() && l.rid.is_none() {
                return Err(mismatch(format!("encoding {} has neither SSRC nor rid", idx)));
            }
            if let Some(pt) = l.pt {
                if !codecs.iter().any(|c| c.pt == pt) {
                    return Err(mismatch(format!(
                        "encoding {} uses unknown payload type {}",
                        idx, pt
                    )));
                }
            }
        }

        Ok(EncodingTable {
            kind: config.kind(),
            codecs,
            rtx_pts,
            remap,
            layers,
        })
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_rtx_pt(&self, pt: Pt) -> bool {
        self.rtx_pts.contains_key(&pt)
    }

    /// The primary payload type an RTX payload type repairs.
    pub fn primary_pt(&self, rtx_pt: Pt) -> Option<Pt> {
        self.rtx_pts.get(&rtx_pt).copied()
    }

    pub fn codec(&self, pt: Pt) -> Option<&CodecEntry> {
        self.codecs.iter().find(|c| c.pt == pt)
    }

    pub fn has_rtx(&self, pt: Pt) -> bool {
        self.codec(pt).map(|c| c.rtx_pt.is_some()).unwrap_or(false)
    }

    /// Payload type to put on forwarded packets.
    pub fn remap_pt(&self, pt: Pt) -> Pt {
        self.remap.get(&pt).copied().unwrap_or(pt)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, idx: usize) -> Option<&EncodingParams> {
        self.layers.get(idx)
    }

    pub fn layer_by_ssrc(&self, ssrc: Ssrc) -> Option<usize> {
        self.layers.iter().position(|l| l.ssrc == Some(ssrc))
    }

    pub fn layer_by_rtx_ssrc(&self, ssrc: Ssrc) -> Option<usize> {
        self.layers.iter().position(|l| l.rtx_ssrc == Some(ssrc))
    }

    pub fn layer_by_rid(&self, rid: Rid) -> Option<usize> {
        self.layers.iter().position(|l| l.rid == Some(rid))
    }

    pub fn layer_by_mapped_ssrc(&self, ssrc: Ssrc) -> Option<usize> {
        self.layers.iter().position(|l| l.mapped_ssrc == ssrc)
    }
}
