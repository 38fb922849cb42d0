// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! Advertisements
//!
//! Pipe advertisements name a logical pipe and its flavor. Peer
//! advertisements travel between peers as opaque JSON documents; only the
//! fields read by the resolver and the discovery cache are modeled.

use crate::error::SerializationError;
use crate::id::{EndpointAddress, PeerId, PipeId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipe flavor, identified on the wire by its type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipeType {
    /// Point-to-point pipe
    Unicast,
    /// Point-to-point pipe with a secured transport
    SecureUnicast,
    /// One-to-many pipe delivered by the wire service
    Propagate,
}

impl PipeType {
    /// Type tag used to key the pipe service registry
    pub fn tag(&self) -> &'static str {
        match self {
            PipeType::Unicast => "JxtaUnicast",
            PipeType::SecureUnicast => "JxtaUnicastSecure",
            PipeType::Propagate => "JxtaPropagate",
        }
    }

    pub fn all() -> [PipeType; 3] {
        [PipeType::Unicast, PipeType::SecureUnicast, PipeType::Propagate]
    }
}

impl fmt::Display for PipeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl std::str::FromStr for PipeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PipeType::all()
            .into_iter()
            .find(|t| t.tag() == s)
            .ok_or_else(|| format!("Unknown pipe type: {}", s))
    }
}

/// Advertisement of a logical pipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeAdvertisement {
    /// Pipe identifier
    pub id: PipeId,
    /// Pipe flavor
    pub pipe_type: PipeType,
    /// Optional human readable name
    #[serde(default)]
    pub name: Option<String>,
}

impl PipeAdvertisement {
    pub fn new(id: impl Into<PipeId>, pipe_type: PipeType) -> Self {
        Self {
            id: id.into(),
            pipe_type,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Advertisement describing a peer and how to reach it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAdvertisement {
    /// Peer identifier
    pub peer_id: PeerId,
    /// Peer name
    pub name: String,
    /// Group the peer belongs to
    #[serde(default)]
    pub group: String,
    /// Endpoint addresses the peer can be reached on
    #[serde(default)]
    pub endpoints: Vec<EndpointAddress>,
}

impl PeerAdvertisement {
    pub fn new(peer_id: impl Into<PeerId>, name: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            name: name.into(),
            group: String::new(),
            endpoints: Vec::new(),
        }
    }

    /// Renders the advertisement as the document carried in protocol messages
    pub fn to_document(&self) -> Result<String, SerializationError> {
        serde_json::to_string(self).map_err(|e| SerializationError::JsonEncode(e.to_string()))
    }

    /// Parses an advertisement document received from a remote peer
    pub fn from_document(doc: &str) -> Result<Self, SerializationError> {
        serde_json::from_str(doc).map_err(|e| SerializationError::JsonDecode(e.to_string()))
    }
}
