// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! Unicast pipes
//!
//! A unicast pipe id is accepted by at most one listener on a peer. The
//! secure flavor shares the behavior under its own type tag.

use super::{AcceptSessions, PipeMessage, push_srdi, subscribe_reannounce, unsubscribe_reannounce};
use crate::adv::{PipeAdvertisement, PipeType};
use crate::error::PipeError;
use crate::id::PipeId;
use crate::listener::Listener;
use crate::peer::Peer;
use crate::pipe_resolver::PipeResolver;
use crate::pipe_service::PipeServiceImpl;
use crate::rendezvous::RendezvousService;
use std::sync::Arc;
use tracing::debug;

pub struct UnicastPipeService {
    pipe_type: PipeType,
    self_peer: Peer,
    sessions: Arc<AcceptSessions>,
    resolver: Arc<PipeResolver>,
    rendezvous: Arc<RendezvousService>,
}

impl UnicastPipeService {
    pub fn new(resolver: Arc<PipeResolver>, rendezvous: Arc<RendezvousService>) -> Result<Self, PipeError> {
        Self::with_type(PipeType::Unicast, resolver, rendezvous)
    }

    pub fn new_secure(resolver: Arc<PipeResolver>, rendezvous: Arc<RendezvousService>) -> Result<Self, PipeError> {
        Self::with_type(PipeType::SecureUnicast, resolver, rendezvous)
    }

    fn with_type(
        pipe_type: PipeType,
        resolver: Arc<PipeResolver>,
        rendezvous: Arc<RendezvousService>,
    ) -> Result<Self, PipeError> {
        if pipe_type == PipeType::Propagate {
            return Err(PipeError::InvalidArgument(
                "propagate pipes are served by the wire service".to_string(),
            ));
        }

        let sessions = Arc::new(AcceptSessions::new());
        subscribe_reannounce(
            &rendezvous,
            pipe_type.tag(),
            Arc::clone(&sessions),
            Arc::clone(&resolver),
        )?;

        Ok(Self {
            pipe_type,
            self_peer: resolver.local_peer().clone(),
            sessions,
            resolver,
            rendezvous,
        })
    }

    pub fn is_secure(&self) -> bool {
        self.pipe_type == PipeType::SecureUnicast
    }
}

impl PipeServiceImpl for UnicastPipeService {
    fn name(&self) -> &str {
        self.pipe_type.tag()
    }

    fn pipe_type(&self) -> PipeType {
        self.pipe_type
    }

    fn add_accept_listener(
        &self,
        adv: &PipeAdvertisement,
        listener: Listener<PipeMessage>,
    ) -> Result<(), PipeError> {
        self.sessions.add(adv, listener, true)?;
        debug!(pipe_id = %adv.id, secure = self.is_secure(), "unicast pipe accepted");
        push_srdi(&self.resolver, adv, None, true);
        Ok(())
    }

    fn remove_accept_listener(
        &self,
        adv: &PipeAdvertisement,
        listener: &Listener<PipeMessage>,
    ) -> Result<(), PipeError> {
        self.sessions.remove(adv, listener)?;
        debug!(pipe_id = %adv.id, secure = self.is_secure(), "unicast pipe closed");
        push_srdi(&self.resolver, adv, None, false);
        Ok(())
    }

    fn local_resolve(&self, adv: &PipeAdvertisement) -> Result<Vec<Peer>, PipeError> {
        self.sessions.local_resolve(adv, &self.self_peer)
    }

    fn resolver(&self) -> Arc<PipeResolver> {
        Arc::clone(&self.resolver)
    }

    fn accepted_pipes(&self) -> Vec<PipeId> {
        self.sessions.pipe_ids()
    }

    fn deliver(&self, pipe_id: &PipeId, message: PipeMessage) -> Result<usize, PipeError> {
        self.sessions.deliver(pipe_id, message)
    }
}

impl Drop for UnicastPipeService {
    fn drop(&mut self) {
        unsubscribe_reannounce(&self.rendezvous, self.pipe_type.tag(), &self.resolver);
    }
}
