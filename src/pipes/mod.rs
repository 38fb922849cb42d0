// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! Pipe service implementations
//!
//! Every implementation keeps its accept sessions in an [`AcceptSessions`]
//! registry, answers `local_resolve` from it, announces registrations to
//! the overlay through the shared pipe resolver and re-announces them to
//! each rendezvous it (re)connects to.

pub mod unicast;
pub mod wire;

pub use unicast::UnicastPipeService;
pub use wire::WirePipeService;

use crate::adv::PipeAdvertisement;
use crate::error::PipeError;
use crate::id::{PeerId, PipeId};
use crate::listener::Listener;
use crate::peer::Peer;
use crate::pipe_resolver::PipeResolver;
use crate::rendezvous::{RdvEvent, RdvEventKind, RendezvousService};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Queue size of the rendezvous event listener of each implementation
const RDV_EVENT_QUEUE: usize = 32;

/// Message delivered to an accept listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeMessage {
    pub source: PeerId,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
struct AcceptSession {
    adv: PipeAdvertisement,
    listeners: Vec<Listener<PipeMessage>>,
}

/// Accept listeners registered by pipe id
#[derive(Debug, Default)]
pub struct AcceptSessions {
    sessions: Mutex<HashMap<PipeId, AcceptSession>>,
}

impl AcceptSessions {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PipeId, AcceptSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `listener` for `adv`; returns true if it opened the session
    ///
    /// With `exclusive`, a pipe id accepts a single listener.
    pub fn add(
        &self,
        adv: &PipeAdvertisement,
        listener: Listener<PipeMessage>,
        exclusive: bool,
    ) -> Result<bool, PipeError> {
        if adv.id.is_empty() {
            return Err(PipeError::InvalidArgument("pipe advertisement has no id".to_string()));
        }

        let mut sessions = self.lock();
        match sessions.get_mut(&adv.id) {
            Some(session) => {
                if exclusive {
                    return Err(PipeError::Busy(format!("pipe {} already accepted", adv.id)));
                }
                if session.listeners.iter().any(|l| l.same_as(&listener)) {
                    return Err(PipeError::Busy(format!("listener already on pipe {}", adv.id)));
                }
                session.listeners.push(listener);
                Ok(false)
            }
            None => {
                sessions.insert(
                    adv.id.clone(),
                    AcceptSession {
                        adv: adv.clone(),
                        listeners: vec![listener],
                    },
                );
                Ok(true)
            }
        }
    }

    /// Unregisters `listener`; returns true if it closed the session
    pub fn remove(&self, adv: &PipeAdvertisement, listener: &Listener<PipeMessage>) -> Result<bool, PipeError> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(&adv.id)
            .ok_or_else(|| PipeError::NotFound(format!("no session for pipe {}", adv.id)))?;
        let pos = session
            .listeners
            .iter()
            .position(|l| l.same_as(listener))
            .ok_or_else(|| PipeError::InvalidArgument(format!("listener not registered on pipe {}", adv.id)))?;

        session.listeners.remove(pos);
        if session.listeners.is_empty() {
            sessions.remove(&adv.id);
            return Ok(true);
        }
        Ok(false)
    }

    pub fn contains(&self, pipe_id: &PipeId) -> bool {
        self.lock().contains_key(pipe_id)
    }

    /// Advertisements of every open session
    pub fn advertisements(&self) -> Vec<PipeAdvertisement> {
        let mut advs: Vec<PipeAdvertisement> = self.lock().values().map(|s| s.adv.clone()).collect();
        advs.sort_by(|a, b| a.id.cmp(&b.id));
        advs
    }

    pub fn pipe_ids(&self) -> Vec<PipeId> {
        self.advertisements().into_iter().map(|adv| adv.id).collect()
    }

    /// `[self_peer]` when a session exists for `adv`
    pub fn local_resolve(&self, adv: &PipeAdvertisement, self_peer: &Peer) -> Result<Vec<Peer>, PipeError> {
        if self.contains(&adv.id) {
            Ok(vec![self_peer.clone()])
        } else {
            Err(PipeError::NotFound(format!("no local listener for pipe {}", adv.id)))
        }
    }

    /// Hands `message` to every listener of `pipe_id`; returns how many took it
    pub fn deliver(&self, pipe_id: &PipeId, message: PipeMessage) -> Result<usize, PipeError> {
        let listeners = self
            .lock()
            .get(pipe_id)
            .map(|s| s.listeners.clone())
            .ok_or_else(|| PipeError::NotFound(format!("no session for pipe {}", pipe_id)))?;

        let mut delivered = 0;
        for listener in listeners {
            match listener.schedule(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(pipe_id = %pipe_id, error = %e, "pipe message not delivered"),
            }
        }
        Ok(delivered)
    }
}

/// Sends an SRDI announce or withdrawal, logging failures
pub(crate) fn push_srdi(
    resolver: &PipeResolver,
    adv: &PipeAdvertisement,
    dest: Option<&PeerId>,
    announcing: bool,
) {
    if let Err(e) = resolver.send_srdi(adv, dest, announcing) {
        warn!(pipe_id = %adv.id, announcing, error = %e, "SRDI push failed");
    }
}

/// Subscribes `sessions` to rendezvous connections so every open pipe is
/// re-announced to a peer when it (re)connects
pub(crate) fn subscribe_reannounce(
    rendezvous: &RendezvousService,
    service_name: &str,
    sessions: Arc<AcceptSessions>,
    resolver: Arc<PipeResolver>,
) -> Result<(), PipeError> {
    let param = resolver.name().to_string();
    let listener = Listener::spawn(RDV_EVENT_QUEUE, move |event: RdvEvent| {
        let peer = match (event.kind, event.peer) {
            (RdvEventKind::Connected | RdvEventKind::Reconnected, Some(peer)) => peer,
            _ => return,
        };
        let advs = sessions.advertisements();
        debug!(peer_id = %peer, count = advs.len(), "re-announcing pipes");
        for adv in &advs {
            push_srdi(&resolver, adv, Some(&peer), true);
        }
    });

    rendezvous.add_event_listener(service_name, Some(&param), listener)?;
    Ok(())
}

/// Drops the subscription made by [`subscribe_reannounce`]
pub(crate) fn unsubscribe_reannounce(rendezvous: &RendezvousService, service_name: &str, resolver: &PipeResolver) {
    if let Err(e) = rendezvous.remove_event_listener(service_name, Some(resolver.name())) {
        debug!(service = service_name, error = %e, "rendezvous listener already gone");
    }
}
