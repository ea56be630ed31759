//! All producers of a router, and the master/slave relation between them.

use std::collections::HashMap;
use std::time::Instant;

use crate::config::TranslateMode;
use crate::fanout::FanOut;
use crate::stats::ProducerSnapshot;
use crate::transcode::SharedFrame;
use crate::util::Soonest;
use crate::{Producer, ProducerError, ProducerId};

/// Arena owning producers by id.
///
/// Producers refer to each other by [`ProducerId`] only. The arena is what
/// resolves those ids, which keeps master and slave from holding references
/// to each other.
///
/// A producer closed directly with [`Producer::close()`] is torn down like
/// [`Producers::close()`] on the next mutating call, and queries treat it as
/// having no relations in the meantime.
///
/// ```
/// # use producer_ingress::*;
/// # use std::time::Instant;
/// let now = Instant::now();
/// let video = |id: u64| {
///     ProducerConfig::new(MediaKind::Video)
///         .add_codec(96, 90_000, "video/VP8", None)
///         .add_encoding(EncodingParams::new(1))
///         .set_translate_mode(TranslateMode::DecodeAndEncode)
///         .build_with_id(id.into(), now)
///         .unwrap()
/// };
///
/// let mut producers = Producers::new();
/// producers.insert(video(1)).unwrap();
/// producers.insert(video(2)).unwrap();
///
/// producers.set_master(2.into(), 1.into()).unwrap();
/// assert_eq!(producers.master(2.into()), Some(1.into()));
/// ```
#[derive(Debug, Default)]
pub struct Producers {
    producers: HashMap<ProducerId, Producer>,
    fanout: FanOut,
}

impl Producers {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Producers::default()
    }

    /// Take ownership of a producer.
    pub fn insert(&mut self, producer: Producer) -> Result<(), ProducerError> {
        self.reap();

        let id = producer.id();
        if self.producers.contains_key(&id) {
            return Err(ProducerError::ProducerExists(id));
        }
        debug!("Insert producer {}", id);
        self.producers.insert(id, producer);
        Ok(())
    }

    /// Look up a producer.
    pub fn get(&self, id: ProducerId) -> Option<&Producer> {
        self.producers.get(&id)
    }

    /// Look up a producer for mutation.
    pub fn get_mut(&mut self, id: ProducerId) -> Option<&mut Producer> {
        self.reap();
        self.producers.get_mut(&id)
    }

    /// Ids of all producers, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = ProducerId> + '_ {
        self.producers.keys().copied()
    }

    /// Number of producers.
    pub fn len(&self) -> usize {
        self.producers.len()
    }

    /// Whether there are no producers.
    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    /// Make `slave` consume the decoded frames of `master`.
    ///
    /// The master must be in [`TranslateMode::DecodeAndEncode`]. A producer is
    /// either a master or a slave, never both.
    pub fn set_master(&mut self, slave: ProducerId, master: ProducerId) -> Result<(), ProducerError> {
        self.reap();

        if !self.producers.contains_key(&slave) {
            return Err(ProducerError::UnknownProducer(slave));
        }
        let m = self
            .producers
            .get(&master)
            .ok_or(ProducerError::UnknownProducer(master))?;

        if m.translate_mode() != TranslateMode::DecodeAndEncode {
            return Err(ProducerError::InvalidRelationship(format!(
                "master {} is not in decode-and-encode mode",
                master
            )));
        }

        self.fanout.link(slave, master)?;

        if let Some(s) = self.producers.get_mut(&slave) {
            s.set_upstream(true);
        }

        info!("Producer {} is slave of {}", slave, master);
        Ok(())
    }

    /// Drop `slave` from the slave set of `master`.
    ///
    /// Returns `false` if they were not related.
    pub fn on_slave_closed(&mut self, master: ProducerId, slave: ProducerId) -> bool {
        self.reap();

        if !self.fanout.remove_slave(master, slave) {
            return false;
        }

        if let Some(s) = self.producers.get_mut(&slave) {
            s.set_upstream(false);
        }

        debug!("Slave {} detached from master {}", slave, master);
        true
    }

    /// The master of a producer, if it is a slave.
    pub fn master(&self, id: ProducerId) -> Option<ProducerId> {
        if !self.is_alive(id) {
            return None;
        }
        self.fanout.master(id).filter(|m| self.is_alive(*m))
    }

    /// The slaves of a producer, sorted.
    pub fn slaves(&self, id: ProducerId) -> Vec<ProducerId> {
        if !self.is_alive(id) {
            return vec![];
        }
        let mut slaves = self.fanout.slaves(id);
        slaves.retain(|s| self.is_alive(*s));
        slaves
    }

    /// Last decoded frame available to a producer.
    ///
    /// For a slave this is its master's frame.
    pub fn last_frame(&self, id: ProducerId) -> Option<SharedFrame> {
        let source = self.master(id).unwrap_or(id);
        self.producers.get(&source)?.last_frame()
    }

    /// Drive the timers of all producers.
    pub fn handle_timeout(&mut self, now: Instant) {
        self.reap();

        for p in self.producers.values_mut() {
            p.handle_timeout(now);
        }
    }

    /// Soonest timeout over all producers.
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.producers
            .values()
            .fold(None, |acc, p| acc.soonest(p.poll_timeout()))
    }

    /// Snapshot of a producer, including its master.
    pub fn snapshot(&self, id: ProducerId) -> Option<ProducerSnapshot> {
        let mut snapshot = self.producers.get(&id)?.snapshot();
        snapshot.master = self.master(id);
        Some(snapshot)
    }

    /// Close and remove a producer.
    ///
    /// The timer is stopped first, then every slave is detached and told with
    /// [`Event::MasterClosed`][crate::Event::MasterClosed], and last the streams
    /// are released. A closed slave is dropped from its master.
    pub fn close(&mut self, id: ProducerId) -> Result<Producer, ProducerError> {
        let producer = self.teardown(id).ok_or(ProducerError::UnknownProducer(id))?;
        info!("Closed producer {}", id);
        Ok(producer)
    }

    fn is_alive(&self, id: ProducerId) -> bool {
        self.producers.get(&id).map(|p| p.is_alive()).unwrap_or(false)
    }

    fn teardown(&mut self, id: ProducerId) -> Option<Producer> {
        self.producers.get_mut(&id)?.stop_timer();

        for slave in self.fanout.detach(id) {
            if let Some(s) = self.producers.get_mut(&slave) {
                s.on_master_closed(id);
            }
        }

        let mut producer = self.producers.remove(&id)?;
        producer.close();
        Some(producer)
    }

    /// Tear down producers closed behind the arena's back.
    fn reap(&mut self) {
        let closed: Vec<_> = self
            .producers
            .values()
            .filter(|p| !p.is_alive())
            .map(|p| p.id())
            .collect();

        for id in closed {
            if self.teardown(id).is_some() {
                debug!("Reaped producer {} closed outside the arena", id);
            }
        }
    }
}
