//! Diff between the known peers and a fresh registry snapshot

use std::collections::HashSet;

use crate::models::{PeerEntry, PeerKey};

/// What one reconciliation pass changes, removals first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub remove: Vec<PeerEntry>,
    pub add: Vec<PeerEntry>,
}

impl ReconcilePlan {
    /// `known` is a snapshot of the peer set, `live` the registry rows that
    /// are still fresh.
    ///
    /// A known remote entry whose (name, address) is absent from `live` is
    /// removed. A live row whose name is not known, or only known through an
    /// entry being removed, is added; for a repeated name the first row wins.
    /// A broker that changed address therefore yields a removal and an
    /// addition, never an update.
    pub fn compute(known: &[PeerEntry], live: Vec<PeerEntry>) -> Self {
        let live_keys: HashSet<PeerKey> = live.iter().map(PeerEntry::key).collect();

        let remove: Vec<PeerEntry> = known
            .iter()
            .filter(|peer| !peer.is_local && !live_keys.contains(&peer.key()))
            .cloned()
            .collect();

        let removed: HashSet<&str> = remove.iter().map(|p| p.name.as_str()).collect();
        let mut names: HashSet<String> = known
            .iter()
            .filter(|peer| !removed.contains(peer.name.as_str()))
            .map(|peer| peer.name.clone())
            .collect();

        let add = live
            .into_iter()
            .filter(|peer| names.insert(peer.name.clone()))
            .collect();

        Self { remove, add }
    }

    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty()
    }
}

/// What a reconciliation pass actually applied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub removed: Vec<PeerEntry>,
    pub added: Vec<PeerEntry>,
    /// The registry could not be read and the pass was skipped
    pub skipped: bool,
}
