// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! The core library for PipeMesh.
//!
//! This crate resolves named pipes to the peers listening on them over a
//! rendezvous overlay: a query/response pipe resolver with per-pipe
//! pending-request bookkeeping, the rendezvous role and peerview
//! membership model, and SRDI propagation of local listener presence.

// Public module declarations
pub mod adv;
pub mod config;
pub mod discovery;
pub mod error;
pub mod group;
pub mod id;
pub mod listener;
pub mod loopback;
pub mod message;
pub mod peer;
pub mod peerview;
pub mod pending;
pub mod pipe_resolver;
pub mod pipe_service;
pub mod pipes;
pub mod rendezvous;
pub mod resolver;
pub mod srdi;

// Re-export commonly used types
pub use adv::{PeerAdvertisement, PipeAdvertisement, PipeType};
pub use config::{CliArgs, NodeConfig};
pub use discovery::DiscoveryCache;
pub use error::{
    ListenerError, MeshError, PipeError, RendezvousError, ResolverError, SerializationError,
};
pub use group::PeerGroup;
pub use id::{EndpointAddress, PeerId, PipeId};
pub use listener::{Listener, ListenerReceiver};
pub use loopback::{LoopbackNetwork, LoopbackResolver};
pub use message::{PIPE_RESOLVER_NAME, PipeMsgType, PipeResolverMsg};
pub use peer::Peer;
pub use peerview::{Peerview, ViewChange};
pub use pending::{PendingRequest, PendingRequestTable, ResolverEvent, ResolverEventKind};
pub use pipe_resolver::{PipeResolver, ResolverConfig, ResolverContext};
pub use pipe_service::{PipeService, PipeServiceImpl};
pub use pipes::{AcceptSessions, PipeMessage, UnicastPipeService, WirePipeService};
pub use rendezvous::{
    FitnessInput, RdvEvent, RdvEventKind, RdvRole, RdvStatus, RendezvousConfiguration,
    RendezvousFitness, RendezvousService,
};
pub use resolver::{QueryHandler, ResolverQuery, ResolverResponse, ResolverService, ResolverSrdi};
pub use srdi::{Expiration, SrdiEntry, SrdiIndex, SrdiMessage};
