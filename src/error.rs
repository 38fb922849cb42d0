// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! Error types for PipeMesh
//!
//! Each component owns a small error enum; `MeshError` aggregates them
//! for callers that drive a whole peer group.

use crate::id::PeerId;
use thiserror::Error;

/// Main error type for PipeMesh operations
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Pipe error: {0}")]
    Pipe(#[from] PipeError),

    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),

    #[error("Rendezvous error: {0}")]
    Rendezvous(#[from] RendezvousError),

    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Pipe resolution and pipe service errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Operation failed: {0}")]
    Failed(String),
}

/// Errors raised by the query/response messaging capability
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
    #[error("Handler already registered: {0}")]
    HandlerExists(String),

    #[error("No handler registered: {0}")]
    NoHandler(String),

    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Messaging service unavailable")]
    Unavailable,
}

/// Rendezvous service errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RendezvousError {
    #[error("No peerview available")]
    NoPeerview,

    #[error("Listener already registered: {0}")]
    Busy(String),

    #[error("Listener not registered: {0}")]
    NoListener(String),

    #[error("Invalid role transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Rendezvous service not running")]
    NotRunning,

    #[error("Operation not available in ad-hoc mode")]
    AdHocMode,

    #[error("Client limit reached: {0}")]
    ClientLimit(u32),
}

/// Listener scheduling errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenerError {
    #[error("Listener queue is full")]
    Full,

    #[error("Listener is closed")]
    Closed,
}

/// Serialization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SerializationError {
    #[error("Postcard encode failed: {0}")]
    PostcardEncode(String),

    #[error("Postcard decode failed: {0}")]
    PostcardDecode(String),

    #[error("JSON encode failed: {0}")]
    JsonEncode(String),

    #[error("JSON decode failed: {0}")]
    JsonDecode(String),
}

impl From<ResolverError> for PipeError {
    fn from(err: ResolverError) -> Self {
        PipeError::Failed(err.to_string())
    }
}

impl From<ListenerError> for PipeError {
    fn from(err: ListenerError) -> Self {
        match err {
            ListenerError::Full => PipeError::Busy(err.to_string()),
            ListenerError::Closed => PipeError::Failed(err.to_string()),
        }
    }
}

impl From<SerializationError> for PipeError {
    fn from(err: SerializationError) -> Self {
        PipeError::Failed(err.to_string())
    }
}

impl From<RendezvousError> for PipeError {
    fn from(err: RendezvousError) -> Self {
        match err {
            RendezvousError::Busy(msg) => PipeError::Busy(msg),
            RendezvousError::NoListener(msg) => PipeError::NotFound(msg),
            other => PipeError::Failed(other.to_string()),
        }
    }
}

impl From<std::io::Error> for MeshError {
    fn from(err: std::io::Error) -> Self {
        MeshError::Io(err.to_string())
    }
}
