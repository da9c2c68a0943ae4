use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::fmt;

pub type PeerId = String;

/// A node reachable over the message channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub id: PeerId,
    pub name: String,
}

impl Peer {
    pub fn new(id: impl Into<PeerId>, name: impl Into<String>) -> Self {
        Peer { id: id.into(), name: name.into() }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Picks the transfer peer uniformly at random.
pub struct PeerSelector {
    rng: StdRng,
}

impl PeerSelector {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        PeerSelector { rng }
    }

    /// `None` when the peer set is empty; the caller backs off and retries.
    pub fn select(&mut self, peers: &[Peer]) -> Option<Peer> {
        peers.choose(&mut self.rng).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn empty_peer_set_selects_nothing() {
        let mut selector = PeerSelector::new(Some(7));
        assert!(selector.select(&[]).is_none());
    }

    #[test]
    fn every_peer_is_eventually_chosen() {
        let peers: Vec<Peer> = (0..4).map(|i| Peer::new(format!("p{i}"), format!("node-{i}"))).collect();
        let mut selector = PeerSelector::new(Some(11));
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let p = selector.select(&peers).expect("non-empty peer set");
            assert!(peers.contains(&p));
            seen.insert(p.id);
        }
        assert_eq!(seen.len(), peers.len(), "uniform choice should reach all peers");
    }
}
