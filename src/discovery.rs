//! Ordered discovery bookkeeping for one record category.
//!
//! Insertion order is replayed at commit time, so membership and order are
//! both tracked: a sequential entry list plus a hash index into it.

use crate::journal::Identifier;
use std::collections::{HashMap, VecDeque};

/// Identifier -> pending-or-resolved record, iterated in discovery order.
#[derive(Debug, Clone)]
pub struct DiscoveryMap<R> {
    entries: Vec<(Identifier, Option<R>)>,
    index: HashMap<Identifier, usize>,
}

impl<R> Default for DiscoveryMap<R> {
    fn default() -> Self {
        DiscoveryMap { entries: Vec::new(), index: HashMap::new() }
    }
}

impl<R> DiscoveryMap<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id` as pending. Returns false (and changes nothing) if it is
    /// already known, pending or resolved.
    pub fn insert_pending(&mut self, id: Identifier) -> bool {
        if self.index.contains_key(&id) {
            return false;
        }
        self.index.insert(id.clone(), self.entries.len());
        self.entries.push((id, None));
        true
    }

    /// Stores the record for an already-discovered id. Returns false if `id`
    /// was never discovered.
    pub fn resolve(&mut self, id: &Identifier, record: R) -> bool {
        match self.index.get(id) {
            Some(&pos) => {
                self.entries[pos].1 = Some(record);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &Identifier) -> Option<&R> {
        self.index.get(id).and_then(|&pos| self.entries[pos].1.as_ref())
    }

    pub fn is_resolved(&self, id: &Identifier) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Identifier, Option<&R>)> {
        self.entries.iter().map(|(id, r)| (id, r.as_ref()))
    }
}

/// A discovery map paired with the FIFO of ids still awaiting a body.
#[derive(Debug, Clone)]
pub struct Discovery<R> {
    map: DiscoveryMap<R>,
    pending: VecDeque<Identifier>,
}

impl<R> Default for Discovery<R> {
    fn default() -> Self {
        Discovery { map: DiscoveryMap::new(), pending: VecDeque::new() }
    }
}

impl<R> Discovery<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `id` and queues it, unless it was seen before.
    pub fn discover(&mut self, id: Identifier) -> bool {
        if self.map.insert_pending(id.clone()) {
            self.pending.push_back(id);
            true
        } else {
            false
        }
    }

    pub fn pop_pending(&mut self) -> Option<Identifier> {
        self.pending.pop_front()
    }

    pub fn resolve(&mut self, id: &Identifier, record: R) -> bool {
        self.map.resolve(id, record)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn map(&self) -> &DiscoveryMap<R> {
        &self.map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Identifier {
        Identifier::from(s)
    }

    #[test]
    fn repeated_discovery_is_a_noop() {
        let mut d: Discovery<u32> = Discovery::new();
        assert!(d.discover(id("a")));
        assert!(d.discover(id("b")));
        assert!(d.resolve(&id("a"), 1));
        assert!(!d.discover(id("a")), "resolved entries stay resolved");
        assert!(!d.discover(id("b")), "pending entries are not queued twice");
        assert_eq!(d.pending_len(), 2);
        assert_eq!(d.map().get(&id("a")), Some(&1));
    }

    #[test]
    fn iteration_follows_discovery_order() {
        let mut map: DiscoveryMap<&str> = DiscoveryMap::new();
        for s in ["z", "a", "m"] {
            map.insert_pending(id(s));
        }
        map.resolve(&id("a"), "A");
        let order: Vec<_> = map.iter().map(|(k, v)| (k.as_str().to_string(), v.copied())).collect();
        assert_eq!(
            order,
            vec![("z".into(), None), ("a".into(), Some("A")), ("m".into(), None)]
        );
    }

    #[test]
    fn resolving_unknown_id_is_refused() {
        let mut map: DiscoveryMap<u8> = DiscoveryMap::new();
        assert!(!map.resolve(&id("ghost"), 0));
        assert!(map.is_empty());
    }
}
