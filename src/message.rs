// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! Pipe resolver protocol messages
//!
//! Queries and answers share one message layout, distinguished by
//! `msg_type`. Messages are postcard-encoded and carried as the payload of
//! resolver queries and responses.

use crate::adv::{PipeAdvertisement, PipeType};
use crate::error::SerializationError;
use crate::id::{PeerId, PipeId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name the pipe resolver registers its handlers under
pub const PIPE_RESOLVER_NAME: &str = "JxtaPipeResolver";

/// Pipe resolver message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipeMsgType {
    Query,
    Answer,
}

impl fmt::Display for PipeMsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipeMsgType::Query => write!(f, "Query"),
            PipeMsgType::Answer => write!(f, "Answer"),
        }
    }
}

/// Query or answer exchanged by pipe resolvers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeResolverMsg {
    /// Query or Answer
    pub msg_type: PipeMsgType,
    /// Pipe being resolved
    pub pipe_id: PipeId,
    /// Pipe type tag
    pub pipe_type: String,
    /// Requester (queries) or responder (answers)
    pub peer_id: Option<PeerId>,
    /// Serialized advertisement of the sending peer
    pub peer_adv: Option<String>,
    /// Set on answers from a peer with a matching listener
    pub found: bool,
    /// Reserved, always false
    pub cached: bool,
}

impl PipeResolverMsg {
    /// Creates a query for `adv`
    pub fn new_query(adv: &PipeAdvertisement, requester: Option<PeerId>, peer_adv: Option<String>) -> Self {
        Self {
            msg_type: PipeMsgType::Query,
            pipe_id: adv.id.clone(),
            pipe_type: adv.pipe_type.tag().to_string(),
            peer_id: requester,
            peer_adv,
            found: false,
            cached: false,
        }
    }

    /// Creates a positive answer from `responder`
    pub fn new_answer(adv: &PipeAdvertisement, responder: PeerId, peer_adv: Option<String>) -> Self {
        Self {
            msg_type: PipeMsgType::Answer,
            pipe_id: adv.id.clone(),
            pipe_type: adv.pipe_type.tag().to_string(),
            peer_id: Some(responder),
            peer_adv,
            found: true,
            cached: false,
        }
    }

    /// Rebuilds the pipe advertisement named by this message
    pub fn pipe_adv(&self) -> Result<PipeAdvertisement, String> {
        if self.pipe_id.is_empty() {
            return Err("message carries no pipe id".to_string());
        }
        let pipe_type: PipeType = self.pipe_type.parse()?;
        Ok(PipeAdvertisement::new(self.pipe_id.clone(), pipe_type))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        postcard::to_allocvec(self).map_err(|e| SerializationError::PostcardEncode(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SerializationError> {
        postcard::from_bytes(bytes).map_err(|e| SerializationError::PostcardDecode(e.to_string()))
    }
}
