// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! Peer records
//!
//! A `Peer` pairs an identifier with its advertisement (when known) and an
//! optional lease expiry. Expiry is advisory for readers: an expired peer
//! stays in whatever table holds it until that table's owner purges it.

use crate::adv::PeerAdvertisement;
use crate::id::PeerId;
use tokio::time::{Duration, Instant};

/// A peer known to this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Peer identifier
    pub peer_id: PeerId,
    /// Advertisement of the peer, if one has been received
    pub advertisement: Option<PeerAdvertisement>,
    /// Lease expiry (None = no lease, never expires)
    pub expires: Option<Instant>,
}

impl Peer {
    pub fn new(peer_id: impl Into<PeerId>) -> Self {
        Self {
            peer_id: peer_id.into(),
            advertisement: None,
            expires: None,
        }
    }

    pub fn from_advertisement(adv: PeerAdvertisement) -> Self {
        Self {
            peer_id: adv.peer_id.clone(),
            advertisement: Some(adv),
            expires: None,
        }
    }

    /// Grants a lease of `duration` starting at `now`
    pub fn with_lease(mut self, now: Instant, duration: Duration) -> Self {
        self.expires = Some(now + duration);
        self
    }

    /// Connected iff the lease ends strictly after `now`
    pub fn is_connected_at(&self, now: Instant) -> bool {
        match self.expires {
            Some(expires) => expires > now,
            None => true,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        !self.is_connected_at(now)
    }

    /// Time left on the lease, zero once expired, None without a lease
    pub fn remaining_at(&self, now: Instant) -> Option<Duration> {
        self.expires
            .map(|expires| expires.saturating_duration_since(now))
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.remaining_at(Instant::now())
    }
}
