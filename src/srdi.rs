// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! Shared Resource Distributed Index (SRDI)
//!
//! Peers push `(key, value)` entries describing what they host to a
//! rendezvous, which keeps them in an [`SrdiIndex`] and uses the index to
//! route queries without flooding the overlay.

use crate::error::SerializationError;
use crate::id::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Key under which pipe ids are indexed
pub const SRDI_PIPE_KEY: &str = "Id";

/// Lifetime of an index entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expiration {
    /// Entry stays until withdrawn
    Open,
    /// Entry is withdrawn
    Close,
}

/// A single indexed attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrdiEntry {
    pub key: String,
    pub value: String,
    pub expiration: Expiration,
}

impl SrdiEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>, expiration: Expiration) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            expiration,
        }
    }
}

/// Batch of entries published by one peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrdiMessage {
    /// Remaining replication hops
    pub ttl: u32,
    /// Peer the entries describe
    pub peer_id: PeerId,
    /// Index partition (pipe type tag for pipe entries)
    pub primary_key: String,
    pub entries: Vec<SrdiEntry>,
}

impl SrdiMessage {
    pub fn new(peer_id: PeerId, primary_key: impl Into<String>, entries: Vec<SrdiEntry>) -> Self {
        Self {
            ttl: 1,
            peer_id,
            primary_key: primary_key.into(),
            entries,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        postcard::to_allocvec(self).map_err(|e| SerializationError::PostcardEncode(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SerializationError> {
        postcard::from_bytes(bytes).map_err(|e| SerializationError::PostcardDecode(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IndexKey {
    handler: String,
    primary_key: String,
    key: String,
    value: String,
}

/// Index of which peers published which entries
#[derive(Debug, Default)]
pub struct SrdiIndex {
    entries: Mutex<HashMap<IndexKey, Vec<PeerId>>>,
}

impl SrdiIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IndexKey, Vec<PeerId>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies every entry of `msg` as published by `msg.peer_id`
    ///
    /// Returns the number of entries that changed the index.
    pub fn apply(&self, handler: &str, msg: &SrdiMessage) -> usize {
        let mut entries = self.lock();
        let mut changed = 0;

        for entry in &msg.entries {
            let key = IndexKey {
                handler: handler.to_string(),
                primary_key: msg.primary_key.clone(),
                key: entry.key.clone(),
                value: entry.value.clone(),
            };
            match entry.expiration {
                Expiration::Open => {
                    let peers = entries.entry(key).or_default();
                    if !peers.contains(&msg.peer_id) {
                        peers.push(msg.peer_id.clone());
                        changed += 1;
                    }
                }
                Expiration::Close => {
                    if let Some(peers) = entries.get_mut(&key) {
                        let before = peers.len();
                        peers.retain(|p| p != &msg.peer_id);
                        if peers.len() != before {
                            changed += 1;
                        }
                        if peers.is_empty() {
                            entries.remove(&key);
                        }
                    }
                }
            }
        }

        changed
    }

    /// Peers that published `(key, value)` under `primary_key`
    pub fn search(&self, handler: &str, primary_key: &str, key: &str, value: &str) -> Vec<PeerId> {
        let entries = self.lock();
        let lookup = IndexKey {
            handler: handler.to_string(),
            primary_key: primary_key.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        };
        entries.get(&lookup).cloned().unwrap_or_default()
    }

    /// Drops everything `peer_id` published
    pub fn remove_peer(&self, peer_id: &PeerId) -> usize {
        let mut entries = self.lock();
        let mut removed = 0;
        entries.retain(|_, peers| {
            let before = peers.len();
            peers.retain(|p| p != peer_id);
            removed += before - peers.len();
            !peers.is_empty()
        });
        removed
    }

    /// Number of indexed `(key, value)` pairs
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
