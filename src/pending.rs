// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! Pending-request table
//!
//! In-flight remote resolutions, bucketed by pipe id in insertion order.
//! Removal from the table is the single gate that decides which event a
//! request's listener receives, so each request is notified at most once.

use crate::adv::PipeAdvertisement;
use crate::error::PipeError;
use crate::id::{PeerId, PipeId};
use crate::listener::Listener;
use crate::peer::Peer;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

/// Outcome of a remote resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverEventKind {
    Resolved,
    Timeout,
}

/// Event delivered to a resolution listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverEvent {
    pub kind: ResolverEventKind,
    pub pipe_adv: Option<PipeAdvertisement>,
    pub peers: Option<Vec<Peer>>,
}

impl ResolverEvent {
    pub fn resolved(pipe_adv: PipeAdvertisement, peers: Vec<Peer>) -> Self {
        Self {
            kind: ResolverEventKind::Resolved,
            pipe_adv: Some(pipe_adv),
            peers: Some(peers),
        }
    }

    pub fn timeout(pipe_adv: PipeAdvertisement) -> Self {
        Self {
            kind: ResolverEventKind::Timeout,
            pipe_adv: Some(pipe_adv),
            peers: None,
        }
    }
}

/// A remote resolution awaiting its answer
#[derive(Debug)]
pub struct PendingRequest {
    /// Identity of the request within its bucket
    pub id: u64,
    pub pipe_adv: PipeAdvertisement,
    /// Only answers from this peer match, when set
    pub destination: Option<PeerId>,
    pub listener: Listener<ResolverEvent>,
    pub deadline: Instant,
}

impl PendingRequest {
    /// Whether an answer from `responder` satisfies this request
    pub fn matches(&self, responder: &PeerId) -> bool {
        match &self.destination {
            Some(dest) => dest == responder,
            None => true,
        }
    }
}

/// Pending requests of one resolver
#[derive(Debug)]
pub struct PendingRequestTable {
    buckets: Mutex<HashMap<PipeId, Vec<PendingRequest>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl PendingRequestTable {
    /// Creates a table holding at most `capacity` requests
    pub fn new(capacity: usize) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PipeId, Vec<PendingRequest>>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a request to its pipe's bucket and returns its id
    pub fn insert(
        &self,
        pipe_adv: PipeAdvertisement,
        destination: Option<PeerId>,
        listener: Listener<ResolverEvent>,
        deadline: Instant,
    ) -> Result<u64, PipeError> {
        let mut buckets = self.lock();
        let total: usize = buckets.values().map(Vec::len).sum();
        if total >= self.capacity {
            return Err(PipeError::OutOfMemory(format!(
                "pending request table full ({} entries)",
                total
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        buckets
            .entry(pipe_adv.id.clone())
            .or_default()
            .push(PendingRequest {
                id,
                pipe_adv,
                destination,
                listener,
                deadline,
            });
        Ok(id)
    }

    /// Removes one request by identity
    pub fn remove(&self, pipe_id: &PipeId, id: u64) -> Option<PendingRequest> {
        let mut buckets = self.lock();
        let bucket = buckets.get_mut(pipe_id)?;
        let pos = bucket.iter().position(|r| r.id == id)?;
        let request = bucket.remove(pos);
        if bucket.is_empty() {
            buckets.remove(pipe_id);
        }
        Some(request)
    }

    /// Removes every request for `pipe_id` that an answer from `responder` satisfies
    pub fn take_matching(&self, pipe_id: &PipeId, responder: &PeerId) -> Vec<PendingRequest> {
        let mut buckets = self.lock();
        let Some(bucket) = buckets.get_mut(pipe_id) else {
            return Vec::new();
        };

        let (matched, kept): (Vec<_>, Vec<_>) =
            std::mem::take(bucket).into_iter().partition(|r| r.matches(responder));
        if kept.is_empty() {
            buckets.remove(pipe_id);
        } else {
            *bucket = kept;
        }
        matched
    }

    /// Total number of pending requests
    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether a bucket exists for `pipe_id`
    pub fn contains(&self, pipe_id: &PipeId) -> bool {
        self.lock().contains_key(pipe_id)
    }

    /// Number of pipe ids with at least one pending request
    pub fn bucket_count(&self) -> usize {
        self.lock().len()
    }

    /// Drops every pending request
    pub fn clear(&self) -> Vec<PendingRequest> {
        self.lock().drain().flat_map(|(_, bucket)| bucket).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adv::PipeType;
    use tokio::time::Duration;

    fn adv(id: &str) -> PipeAdvertisement {
        PipeAdvertisement::new(id, PipeType::Unicast)
    }

    fn listener() -> Listener<ResolverEvent> {
        Listener::channel(1).0
    }

    #[test]
    fn test_remove_last_drops_bucket() {
        let table = PendingRequestTable::new(16);
        let deadline = Instant::now() + Duration::from_secs(5);
        let id = table.insert(adv("p1"), None, listener(), deadline).unwrap();

        assert!(table.contains(&PipeId::from("p1")));
        assert!(table.remove(&PipeId::from("p1"), id).is_some());
        assert!(!table.contains(&PipeId::from("p1")));
        assert!(table.is_empty());
        assert!(table.remove(&PipeId::from("p1"), id).is_none());
    }

    #[test]
    fn test_take_matching_respects_destination() {
        let table = PendingRequestTable::new(16);
        let deadline = Instant::now() + Duration::from_secs(5);
        table.insert(adv("p1"), None, listener(), deadline).unwrap();
        table
            .insert(adv("p1"), Some(PeerId::from("urn:peer:b")), listener(), deadline)
            .unwrap();
        table
            .insert(adv("p1"), Some(PeerId::from("urn:peer:c")), listener(), deadline)
            .unwrap();

        let matched = table.take_matching(&PipeId::from("p1"), &PeerId::from("urn:peer:b"));
        assert_eq!(matched.len(), 2);
        assert!(matched[0].destination.is_none());
        assert_eq!(table.len(), 1);

        // A second answer from the same peer finds nothing left for it
        assert!(table.take_matching(&PipeId::from("p1"), &PeerId::from("urn:peer:b")).is_empty());

        let matched = table.take_matching(&PipeId::from("p1"), &PeerId::from("urn:peer:c"));
        assert_eq!(matched.len(), 1);
        assert_eq!(table.bucket_count(), 0);
    }

    #[test]
    fn test_take_matching_keeps_insertion_order() {
        let table = PendingRequestTable::new(16);
        let deadline = Instant::now() + Duration::from_secs(5);
        let first = table.insert(adv("p1"), None, listener(), deadline).unwrap();
        let second = table.insert(adv("p1"), None, listener(), deadline).unwrap();

        let matched = table.take_matching(&PipeId::from("p1"), &PeerId::from("urn:peer:x"));
        let ids: Vec<u64> = matched.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn test_capacity_limit() {
        let table = PendingRequestTable::new(1);
        let deadline = Instant::now() + Duration::from_secs(5);
        table.insert(adv("p1"), None, listener(), deadline).unwrap();

        let err = table.insert(adv("p2"), None, listener(), deadline).unwrap_err();
        assert!(matches!(err, PipeError::OutOfMemory(_)));
        assert!(!table.contains(&PipeId::from("p2")));
    }

    #[test]
    fn test_clear_returns_everything() {
        let table = PendingRequestTable::new(16);
        let deadline = Instant::now() + Duration::from_secs(5);
        table.insert(adv("p1"), None, listener(), deadline).unwrap();
        table.insert(adv("p2"), None, listener(), deadline).unwrap();

        assert_eq!(table.clear().len(), 2);
        assert!(table.is_empty());
    }
}
