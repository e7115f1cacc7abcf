//! In-memory view of the known brokers, keyed by broker name

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::models::PeerEntry;

#[derive(Debug, Default)]
pub struct PeerSet {
    peers: DashMap<String, PeerEntry>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<PeerEntry> {
        self.peers.get(name).map(|p| p.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.peers.contains_key(name)
    }

    /// Insert or replace the entry stored under its name
    pub fn upsert(&self, peer: PeerEntry) {
        self.peers.insert(peer.name.clone(), peer);
    }

    /// Insert only if no entry exists under that name. Returns whether it was inserted.
    pub fn insert_if_absent(&self, peer: PeerEntry) -> bool {
        match self.peers.entry(peer.name.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(peer);
                true
            }
        }
    }

    /// Remove whatever is stored under `name`
    pub fn remove(&self, name: &str) -> Option<PeerEntry> {
        self.peers.remove(name).map(|(_, peer)| peer)
    }

    /// Remove the entry only if it is still the same broker (name and address)
    pub fn remove_exact(&self, peer: &PeerEntry) -> bool {
        self.peers.remove_if(&peer.name, |_, stored| stored == peer).is_some()
    }

    /// Refresh the heartbeat of a stored entry and return the updated copy
    pub fn touch(&self, name: &str) -> Option<PeerEntry> {
        self.peers.get_mut(name).map(|mut peer| {
            peer.touch();
            peer.value().clone()
        })
    }

    /// Copy of every entry, safe to iterate while the set is being mutated
    pub fn snapshot(&self) -> Vec<PeerEntry> {
        self.peers.iter().map(|p| p.value().clone()).collect()
    }

    pub fn local(&self) -> Option<PeerEntry> {
        self.peers
            .iter()
            .find(|p| p.is_local)
            .map(|p| p.value().clone())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_if_absent_keeps_first() {
        let set = PeerSet::new();
        assert!(set.insert_if_absent(PeerEntry::new("lb-b", "tcp://b:1")));
        assert!(!set.insert_if_absent(PeerEntry::new("lb-b", "tcp://b:2")));
        assert_eq!(set.get("lb-b").unwrap().address, "tcp://b:1");
    }

    #[test]
    fn test_remove_exact_requires_same_address() {
        let set = PeerSet::new();
        set.upsert(PeerEntry::new("lb-b", "tcp://b:2"));

        assert!(!set.remove_exact(&PeerEntry::new("lb-b", "tcp://b:1")));
        assert!(set.contains("lb-b"));

        assert!(set.remove_exact(&PeerEntry::new("lb-b", "tcp://b:2")));
        assert!(set.is_empty());
    }

    #[test]
    fn test_touch_and_local_lookup() {
        let set = PeerSet::new();
        let mut local = PeerEntry::local("lb-me", "tcp://me:1");
        local.last_heartbeat = 0;
        set.upsert(local);
        set.upsert(PeerEntry::new("lb-b", "tcp://b:1"));

        let touched = set.touch("lb-me").unwrap();
        assert!(touched.last_heartbeat > 0);
        assert_eq!(set.local().unwrap().name, "lb-me");
        assert!(set.touch("lb-missing").is_none());
        assert_eq!(set.snapshot().len(), 2);
    }
}
