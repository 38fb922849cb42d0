// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! Resolver messaging capability
//!
//! Generic query/response/SRDI transport that protocol handlers such as
//! the pipe resolver are built on. Handlers register under a name; every
//! message carries the name of the handler it is addressed to.

use crate::error::{PipeError, ResolverError};
use crate::id::PeerId;
use crate::listener::Listener;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A query addressed to a named handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverQuery {
    pub handler_name: String,
    /// Identifier echoed by responses
    pub query_id: u64,
    /// Peer that originated the query; responses are sent here
    pub src_peer_id: PeerId,
    /// Number of times the query has been forwarded
    pub hop_count: u32,
    pub payload: Vec<u8>,
}

impl ResolverQuery {
    pub fn new(handler_name: impl Into<String>, src_peer_id: PeerId, payload: Vec<u8>) -> Self {
        Self {
            handler_name: handler_name.into(),
            query_id: 0,
            src_peer_id,
            hop_count: 0,
            payload,
        }
    }
}

/// A response to a previously received query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverResponse {
    pub handler_name: String,
    pub query_id: u64,
    /// Peer that produced the response
    pub responder: PeerId,
    pub payload: Vec<u8>,
}

/// An SRDI push addressed to a named handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverSrdi {
    pub handler_name: String,
    pub src_peer_id: PeerId,
    pub payload: Vec<u8>,
}

/// Receives queries addressed to a registered handler name
///
/// Called on a delivery task; implementations must not block on events
/// delivered by the same resolver service.
pub trait QueryHandler: Send + Sync {
    fn process_query(&self, query: &ResolverQuery) -> Result<(), PipeError>;
}

/// Query/response/SRDI messaging between peers
pub trait ResolverService: Send + Sync {
    /// Identifier of the peer this service sends from
    fn local_peer_id(&self) -> &PeerId;

    fn register_query_handler(
        &self,
        name: &str,
        handler: Arc<dyn QueryHandler>,
    ) -> Result<(), ResolverError>;

    fn unregister_query_handler(&self, name: &str) -> Result<(), ResolverError>;

    fn register_response_listener(
        &self,
        name: &str,
        listener: Listener<ResolverResponse>,
    ) -> Result<(), ResolverError>;

    fn unregister_response_listener(&self, name: &str) -> Result<(), ResolverError>;

    fn register_srdi_listener(
        &self,
        name: &str,
        listener: Listener<ResolverSrdi>,
    ) -> Result<(), ResolverError>;

    fn unregister_srdi_listener(&self, name: &str) -> Result<(), ResolverError>;

    /// Sends a query to `dest`, or to every other peer when `dest` is None
    ///
    /// Assigns a query id when `query.query_id` is zero and returns the id used.
    fn send_query(&self, query: ResolverQuery, dest: Option<&PeerId>)
    -> Result<u64, ResolverError>;

    /// Sends a response back to `dest`
    fn send_response(&self, response: ResolverResponse, dest: &PeerId)
    -> Result<(), ResolverError>;

    /// Sends an SRDI message to `dest`, or to every other peer when `dest` is None
    fn send_srdi(&self, srdi: ResolverSrdi, dest: Option<&PeerId>) -> Result<(), ResolverError>;
}
