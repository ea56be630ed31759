//! Master/slave relations between producers.

use std::collections::{HashMap, HashSet};

use crate::{ProducerError, ProducerId};

/// Relation table. Producers hold no references to each other, only this
/// table knows who is whose master.
///
/// One level only: a master is never a slave and a slave never has slaves.
#[derive(Debug, Default)]
pub struct FanOut {
    master_of: HashMap<ProducerId, ProducerId>,
    slaves_of: HashMap<ProducerId, HashSet<ProducerId>>,
}

fn invalid(msg: String) -> ProducerError {
    ProducerError::InvalidRelationship(msg)
}

impl FanOut {
    /// Make `slave` a slave of `master`.
    ///
    /// Linking to the current master again is a no-op. Nothing changes on error.
    pub fn link(&mut self, slave: ProducerId, master: ProducerId) -> Result<(), ProducerError> {
        if slave == master {
            return Err(invalid(format!("{} can't be its own master", slave)));
        }

        match self.master_of.get(&slave) {
            Some(m) if *m == master => return Ok(()),
            Some(m) => {
                return Err(invalid(format!("{} already has master {}", slave, m)));
            }
            None => {}
        }

        if let Some(m) = self.master_of.get(&master) {
            return Err(invalid(format!("{} is itself a slave of {}", master, m)));
        }

        if self.has_slaves(slave) {
            return Err(invalid(format!("{} has slaves", slave)));
        }

        self.master_of.insert(slave, master);
        self.slaves_of.entry(master).or_default().insert(slave);

        debug!("Linked slave {} to master {}", slave, master);

        Ok(())
    }

    /// Remove `slave` from the slaves of `master`. No-op if it isn't one.
    pub fn remove_slave(&mut self, master: ProducerId, slave: ProducerId) -> bool {
        let Some(slaves) = self.slaves_of.get_mut(&master) else {
            return false;
        };

        let removed = slaves.remove(&slave);
        if slaves.is_empty() {
            self.slaves_of.remove(&master);
        }
        if removed {
            self.master_of.remove(&slave);
            debug!("Removed slave {} from master {}", slave, master);
        }

        removed
    }

    /// Remove all relations of `id`. Returns the slaves it had, sorted.
    pub fn detach(&mut self, id: ProducerId) -> Vec<ProducerId> {
        if let Some(master) = self.master_of.get(&id).copied() {
            self.remove_slave(master, id);
        }

        let mut slaves: Vec<_> = self
            .slaves_of
            .remove(&id)
            .map(|s| s.into_iter().collect())
            .unwrap_or_default();
        slaves.sort();

        for s in &slaves {
            self.master_of.remove(s);
        }

        slaves
    }

    /// The master of `id`.
    pub fn master(&self, id: ProducerId) -> Option<ProducerId> {
        self.master_of.get(&id).copied()
    }

    /// The slaves of `id`, sorted.
    pub fn slaves(&self, id: ProducerId) -> Vec<ProducerId> {
        let mut v: Vec<_> = self
            .slaves_of
            .get(&id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        v.sort();
        v
    }

    /// Whether `id` has any slaves.
    pub fn has_slaves(&self, id: ProducerId) -> bool {
        self.slaves_of.get(&id).map(|s| !s.is_empty()).unwrap_or(false)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ids() -> (ProducerId, ProducerId, ProducerId) {
        (1.into(), 2.into(), 3.into())
    }

    #[test]
    fn link_and_remove() {
        let (m, s, _) = ids();
        let mut f = FanOut::default();

        f.link(s, m).unwrap();
        assert_eq!(f.master(s), Some(m));
        assert_eq!(f.slaves(m), vec![s]);

        // same master again is fine
        f.link(s, m).unwrap();
        assert_eq!(f.slaves(m), vec![s]);

        assert!(f.remove_slave(m, s));
        assert!(!f.has_slaves(m));
        assert_eq!(f.master(s), None);

        // repeated removal is a no-op
        assert!(!f.remove_slave(m, s));
    }

    #[test]
    fn no_chains() {
        let (a, b, c) = ids();
        let mut f = FanOut::default();

        f.link(b, a).unwrap();

        // a slave can't be a master
        assert!(matches!(
            f.link(c, b),
            Err(ProducerError::InvalidRelationship(_))
        ));
        // a master can't become a slave
        assert!(f.link(a, c).is_err());
        // one master only
        assert!(f.link(b, c).is_err());
        // not itself
        assert!(f.link(c, c).is_err());

        // nothing changed
        assert_eq!(f.slaves(a), vec![b]);
        assert!(!f.has_slaves(b));
        assert!(!f.has_slaves(c));
        assert_eq!(f.master(a), None);
    }

    #[test]
    fn detach_master() {
        let (m, s1, s2) = ids();
        let mut f = FanOut::default();
        f.link(s1, m).unwrap();
        f.link(s2, m).unwrap();

        assert_eq!(f.detach(m), vec![s1, s2]);
        assert_eq!(f.master(s1), None);
        assert_eq!(f.master(s2), None);
        assert!(f.detach(m).is_empty());
    }

    #[test]
    fn detach_slave() {
        let (m, s1, s2) = ids();
        let mut f = FanOut::default();
        f.link(s1, m).unwrap();
        f.link(s2, m).unwrap();

        assert!(f.detach(s1).is_empty());
        assert_eq!(f.slaves(m), vec![s2]);
    }
}
