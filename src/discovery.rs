// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! Discovery cache
//!
//! Local cache of peer advertisements learned from protocol traffic.
//! Publishing is best-effort: callers log failures and carry on.

use crate::adv::PeerAdvertisement;
use crate::error::SerializationError;
use crate::id::PeerId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::time::{Duration, Instant};

/// Default lifetime of a published advertisement
pub const DEFAULT_ADV_LIFETIME: Duration = Duration::from_secs(2 * 60 * 60);

/// A cached advertisement
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub advertisement: PeerAdvertisement,
    /// When the advertisement was last published
    pub published: Instant,
    /// How long the entry stays valid after publication
    pub lifetime: Duration,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.published) >= self.lifetime
    }
}

/// Cache of peer advertisements keyed by peer id
#[derive(Debug, Clone)]
pub struct DiscoveryCache {
    entries: Arc<RwLock<HashMap<PeerId, CacheEntry>>>,
    lifetime: Duration,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::with_lifetime(DEFAULT_ADV_LIFETIME)
    }

    pub fn with_lifetime(lifetime: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            lifetime,
        }
    }

    /// Publishes (or refreshes) an advertisement
    pub fn publish(&self, advertisement: PeerAdvertisement) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let published = Instant::now();

        entries
            .entry(advertisement.peer_id.clone())
            .and_modify(|e| {
                e.advertisement = advertisement.clone();
                e.published = published;
            })
            .or_insert(CacheEntry {
                advertisement,
                published,
                lifetime: self.lifetime,
            });
    }

    /// Parses and publishes an advertisement document
    pub fn publish_document(&self, doc: &str) -> Result<PeerId, SerializationError> {
        let adv = PeerAdvertisement::from_document(doc)?;
        let peer_id = adv.peer_id.clone();
        self.publish(adv);
        Ok(peer_id)
    }

    /// Looks up a non-expired advertisement
    pub fn lookup(&self, peer_id: &PeerId) -> Option<PeerAdvertisement> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        entries
            .get(peer_id)
            .filter(|e| !e.is_expired_at(now))
            .map(|e| e.advertisement.clone())
    }

    pub fn remove(&self, peer_id: &PeerId) -> Option<PeerAdvertisement> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(peer_id).map(|e| e.advertisement)
    }

    /// Removes expired entries, returning how many were dropped
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired_at(now));
        before - entries.len()
    }

    pub fn count(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.len()
    }
}

impl Default for DiscoveryCache {
    fn default() -> Self {
        Self::new()
    }
}
