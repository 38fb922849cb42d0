// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! Wire (propagate) pipes
//!
//! Any number of local listeners may accept on a propagate pipe. The pipe
//! is announced when its first listener arrives and withdrawn when the last
//! one leaves.

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

pub struct WirePipeService {
    self_peer: Peer,
    sessions: Arc<AcceptSessions>,
    resolver: Arc<PipeResolver>,
    rendezvous: Arc<RendezvousService>,
}

impl WirePipeService {
    pub fn new(resolver: Arc<PipeResolver>, rendezvous: Arc<RendezvousService>) -> Result<Self, PipeError> {
        let sessions = Arc::new(AcceptSessions::new());
        subscribe_reannounce(
            &rendezvous,
            PipeType::Propagate.tag(),
            Arc::clone(&sessions),
            Arc::clone(&resolver),
        )?;

        Ok(Self {
            self_peer: resolver.local_peer().clone(),
            sessions,
            resolver,
            rendezvous,
        })
    }
}

impl PipeServiceImpl for WirePipeService {
    fn name(&self) -> &str {
        PipeType::Propagate.tag()
    }

    fn pipe_type(&self) -> PipeType {
        PipeType::Propagate
    }

    fn add_accept_listener(
        &self,
        adv: &PipeAdvertisement,
        listener: Listener<PipeMessage>,
    ) -> Result<(), PipeError> {
        if self.sessions.add(adv, listener, false)? {
            debug!(pipe_id = %adv.id, "first wire listener");
            push_srdi(&self.resolver, adv, None, true);
        }
        Ok(())
    }

    fn remove_accept_listener(
        &self,
        adv: &PipeAdvertisement,
        listener: &Listener<PipeMessage>,
    ) -> Result<(), PipeError> {
        if self.sessions.remove(adv, listener)? {
            debug!(pipe_id = %adv.id, "last wire listener gone");
            push_srdi(&self.resolver, adv, None, false);
        }
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

impl Drop for WirePipeService {
    fn drop(&mut self) {
        unsubscribe_reannounce(&self.rendezvous, PipeType::Propagate.tag(), &self.resolver);
    }
}
