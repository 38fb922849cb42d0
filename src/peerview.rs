// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! Peerview
//!
//! The rendezvous backbone as seen from one peer: the local view holds
//! direct overlay neighbors, the global view every rendezvous known to
//! exist. Both are kept ordered by peer id and handed out as copies.

use crate::id::PeerId;
use crate::peer::Peer;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default number of neighbors at which the local view is considered healthy
pub const DEFAULT_HAPPY_SIZE: usize = 4;

#[derive(Debug, Default)]
struct Views {
    local: Vec<Peer>,
    global: Vec<Peer>,
}

/// Result of reconciling the global view against a membership list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewChange {
    pub added: Vec<PeerId>,
    pub removed: Vec<PeerId>,
}

impl ViewChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Local and global rendezvous views
#[derive(Debug)]
pub struct Peerview {
    self_peer: Peer,
    happy_size: usize,
    views: Mutex<Views>,
}

/// Inserts or replaces `peer`, keeping `view` sorted. Returns true if new.
fn upsert(view: &mut Vec<Peer>, peer: Peer) -> bool {
    match view.binary_search_by(|p| p.peer_id.cmp(&peer.peer_id)) {
        Ok(pos) => {
            view[pos] = peer;
            false
        }
        Err(pos) => {
            view.insert(pos, peer);
            true
        }
    }
}

impl Peerview {
    pub fn new(self_peer: Peer, happy_size: usize) -> Self {
        Self {
            views: Mutex::new(Views {
                local: Vec::new(),
                global: vec![self_peer.clone()],
            }),
            self_peer,
            happy_size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Views> {
        self.views.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn self_peer(&self) -> Peer {
        self.self_peer.clone()
    }

    pub fn happy_size(&self) -> usize {
        self.happy_size
    }

    /// Snapshot of the direct neighbors
    pub fn get_localview(&self) -> Vec<Peer> {
        self.lock().local.clone()
    }

    /// Snapshot of every known rendezvous, including this peer
    pub fn get_globalview(&self) -> Vec<Peer> {
        self.lock().global.clone()
    }

    pub fn localview_size(&self) -> usize {
        self.lock().local.len()
    }

    pub fn is_happy(&self) -> bool {
        self.localview_size() >= self.happy_size
    }

    pub fn contains_local(&self, peer_id: &PeerId) -> bool {
        self.lock().local.iter().any(|p| &p.peer_id == peer_id)
    }

    /// Adds or refreshes a neighbor; returns true if it was not known before
    pub fn add_local_peer(&self, peer: Peer) -> bool {
        if peer.peer_id == self.self_peer.peer_id {
            return false;
        }
        let mut views = self.lock();
        upsert(&mut views.global, peer.clone());
        upsert(&mut views.local, peer)
    }

    /// Removes a neighbor from the local view; the global view is left to reconciliation
    pub fn remove_local_peer(&self, peer_id: &PeerId) -> Option<Peer> {
        let mut views = self.lock();
        let pos = views.local.iter().position(|p| &p.peer_id == peer_id)?;
        Some(views.local.remove(pos))
    }

    /// Replaces the global view with `members` plus this peer and the local view
    ///
    /// Applying the same membership twice yields an empty change.
    pub fn reconcile_globalview(&self, members: Vec<Peer>) -> ViewChange {
        let mut views = self.lock();

        let mut next: Vec<Peer> = Vec::with_capacity(members.len() + views.local.len() + 1);
        upsert(&mut next, self.self_peer.clone());
        for peer in views.local.iter().cloned().chain(members) {
            upsert(&mut next, peer);
        }

        let added = next
            .iter()
            .filter(|p| !views.global.iter().any(|g| g.peer_id == p.peer_id))
            .map(|p| p.peer_id.clone())
            .collect();
        let removed = views
            .global
            .iter()
            .filter(|g| !next.iter().any(|p| p.peer_id == g.peer_id))
            .map(|g| g.peer_id.clone())
            .collect();

        views.global = next;
        ViewChange { added, removed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(peers: &[Peer]) -> Vec<&str> {
        peers.iter().map(|p| p.peer_id.as_str()).collect()
    }

    #[test]
    fn test_add_local_is_idempotent() {
        let pv = Peerview::new(Peer::new("urn:peer:self"), 2);

        assert!(pv.add_local_peer(Peer::new("urn:peer:b")));
        assert!(!pv.add_local_peer(Peer::new("urn:peer:b")));
        assert!(pv.add_local_peer(Peer::new("urn:peer:a")));

        assert_eq!(ids(&pv.get_localview()), vec!["urn:peer:a", "urn:peer:b"]);
        assert!(pv.is_happy());
    }

    #[test]
    fn test_self_is_never_a_neighbor() {
        let pv = Peerview::new(Peer::new("urn:peer:self"), 2);
        assert!(!pv.add_local_peer(Peer::new("urn:peer:self")));
        assert_eq!(pv.localview_size(), 0);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let pv = Peerview::new(Peer::new("urn:peer:self"), 2);
        pv.add_local_peer(Peer::new("urn:peer:a"));

        let snapshot = pv.get_localview();
        pv.remove_local_peer(&PeerId::from("urn:peer:a"));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(pv.localview_size(), 0);
    }

    #[test]
    fn test_reconcile_globalview() {
        let pv = Peerview::new(Peer::new("urn:peer:m"), 2);
        pv.add_local_peer(Peer::new("urn:peer:a"));

        let change = pv.reconcile_globalview(vec![Peer::new("urn:peer:z"), Peer::new("urn:peer:c")]);
        assert_eq!(change.added, vec![PeerId::from("urn:peer:c"), PeerId::from("urn:peer:z")]);
        assert_eq!(
            ids(&pv.get_globalview()),
            vec!["urn:peer:a", "urn:peer:c", "urn:peer:m", "urn:peer:z"]
        );

        let again = pv.reconcile_globalview(vec![Peer::new("urn:peer:c"), Peer::new("urn:peer:z")]);
        assert!(again.is_empty());

        let shrink = pv.reconcile_globalview(vec![Peer::new("urn:peer:c")]);
        assert_eq!(shrink.removed, vec![PeerId::from("urn:peer:z")]);
    }
}
