// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! In-process loopback overlay
//!
//! A [`LoopbackNetwork`] connects any number of peers living in the same
//! process. Each peer gets a [`LoopbackResolver`] implementing
//! [`ResolverService`]; queries are delivered on spawned tasks and
//! responses and SRDI pushes through the receiving peer's listeners, so
//! delivery is always asynchronous with respect to the sender.

use crate::error::ResolverError;
use crate::id::PeerId;
use crate::listener::Listener;
use crate::resolver::{QueryHandler, ResolverQuery, ResolverResponse, ResolverService, ResolverSrdi};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handlers registered by one member
#[derive(Default)]
struct Endpoint {
    query_handlers: Mutex<HashMap<String, Arc<dyn QueryHandler>>>,
    response_listeners: Mutex<HashMap<String, Listener<ResolverResponse>>>,
    srdi_listeners: Mutex<HashMap<String, Listener<ResolverSrdi>>>,
}

/// Shared membership of an in-process overlay
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    members: Arc<Mutex<HashMap<PeerId, Arc<Endpoint>>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member and returns its messaging service
    pub fn join(&self, peer_id: impl Into<PeerId>) -> Arc<LoopbackResolver> {
        let peer_id = peer_id.into();
        let endpoint = lock(&self.members)
            .entry(peer_id.clone())
            .or_default()
            .clone();

        debug!(peer_id = %peer_id, "joined loopback network");
        Arc::new(LoopbackResolver {
            peer_id,
            network: self.clone(),
            endpoint,
            next_query_id: AtomicU64::new(1),
            sent: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
        })
    }

    /// Removes a member; messages addressed to it fail afterwards
    pub fn leave(&self, peer_id: &PeerId) -> bool {
        lock(&self.members).remove(peer_id).is_some()
    }

    pub fn members(&self) -> Vec<PeerId> {
        let mut members: Vec<PeerId> = lock(&self.members).keys().cloned().collect();
        members.sort();
        members
    }

    fn endpoint(&self, peer_id: &PeerId) -> Option<Arc<Endpoint>> {
        lock(&self.members).get(peer_id).cloned()
    }

    fn endpoints_except(&self, peer_id: &PeerId) -> Vec<(PeerId, Arc<Endpoint>)> {
        lock(&self.members)
            .iter()
            .filter(|(id, _)| *id != peer_id)
            .map(|(id, ep)| (id.clone(), ep.clone()))
            .collect()
    }
}

/// Messaging service of one loopback member
pub struct LoopbackResolver {
    peer_id: PeerId,
    network: LoopbackNetwork,
    endpoint: Arc<Endpoint>,
    next_query_id: AtomicU64,
    sent: AtomicUsize,
    fail_sends: AtomicBool,
}

impl LoopbackResolver {
    /// Makes every subsequent send fail until reset
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Number of messages handed to the network so far
    pub fn sent_messages(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    fn check_send(&self) -> Result<(), ResolverError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ResolverError::SendFailed("send failure injected".to_string()));
        }
        Ok(())
    }

    fn targets(&self, dest: Option<&PeerId>) -> Result<Vec<(PeerId, Arc<Endpoint>)>, ResolverError> {
        match dest {
            Some(peer_id) => {
                let endpoint = self
                    .network
                    .endpoint(peer_id)
                    .ok_or_else(|| ResolverError::UnknownPeer(peer_id.clone()))?;
                Ok(vec![(peer_id.clone(), endpoint)])
            }
            None => Ok(self.network.endpoints_except(&self.peer_id)),
        }
    }
}

impl ResolverService for LoopbackResolver {
    fn local_peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    fn register_query_handler(
        &self,
        name: &str,
        handler: Arc<dyn QueryHandler>,
    ) -> Result<(), ResolverError> {
        let mut handlers = lock(&self.endpoint.query_handlers);
        if handlers.contains_key(name) {
            return Err(ResolverError::HandlerExists(name.to_string()));
        }
        handlers.insert(name.to_string(), handler);
        Ok(())
    }

    fn unregister_query_handler(&self, name: &str) -> Result<(), ResolverError> {
        lock(&self.endpoint.query_handlers)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ResolverError::NoHandler(name.to_string()))
    }

    fn register_response_listener(
        &self,
        name: &str,
        listener: Listener<ResolverResponse>,
    ) -> Result<(), ResolverError> {
        let mut listeners = lock(&self.endpoint.response_listeners);
        if listeners.contains_key(name) {
            return Err(ResolverError::HandlerExists(name.to_string()));
        }
        listeners.insert(name.to_string(), listener);
        Ok(())
    }

    fn unregister_response_listener(&self, name: &str) -> Result<(), ResolverError> {
        lock(&self.endpoint.response_listeners)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ResolverError::NoHandler(name.to_string()))
    }

    fn register_srdi_listener(
        &self,
        name: &str,
        listener: Listener<ResolverSrdi>,
    ) -> Result<(), ResolverError> {
        let mut listeners = lock(&self.endpoint.srdi_listeners);
        if listeners.contains_key(name) {
            return Err(ResolverError::HandlerExists(name.to_string()));
        }
        listeners.insert(name.to_string(), listener);
        Ok(())
    }

    fn unregister_srdi_listener(&self, name: &str) -> Result<(), ResolverError> {
        lock(&self.endpoint.srdi_listeners)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ResolverError::NoHandler(name.to_string()))
    }

    fn send_query(
        &self,
        mut query: ResolverQuery,
        dest: Option<&PeerId>,
    ) -> Result<u64, ResolverError> {
        self.check_send()?;
        if query.query_id == 0 {
            query.query_id = self.next_query_id.fetch_add(1, Ordering::Relaxed);
        }
        let query_id = query.query_id;

        for (peer_id, endpoint) in self.targets(dest)? {
            let handler = lock(&endpoint.query_handlers)
                .get(&query.handler_name)
                .cloned();
            self.sent.fetch_add(1, Ordering::SeqCst);

            let Some(handler) = handler else {
                debug!(peer_id = %peer_id, handler = %query.handler_name, "no query handler, dropped");
                continue;
            };
            let query = query.clone();
            tokio::spawn(async move {
                if let Err(e) = handler.process_query(&query) {
                    debug!(peer_id = %peer_id, query_id = query.query_id, error = %e, "query not answered");
                }
            });
        }

        Ok(query_id)
    }

    fn send_response(&self, response: ResolverResponse, dest: &PeerId) -> Result<(), ResolverError> {
        self.check_send()?;
        let endpoint = self
            .network
            .endpoint(dest)
            .ok_or_else(|| ResolverError::UnknownPeer(dest.clone()))?;
        self.sent.fetch_add(1, Ordering::SeqCst);

        let listener = lock(&endpoint.response_listeners)
            .get(&response.handler_name)
            .cloned();
        match listener {
            Some(listener) => {
                if let Err(e) = listener.schedule(response) {
                    warn!(peer_id = %dest, error = %e, "response dropped");
                }
            }
            None => debug!(peer_id = %dest, handler = %response.handler_name, "no response listener, dropped"),
        }
        Ok(())
    }

    fn send_srdi(&self, srdi: ResolverSrdi, dest: Option<&PeerId>) -> Result<(), ResolverError> {
        self.check_send()?;

        for (peer_id, endpoint) in self.targets(dest)? {
            self.sent.fetch_add(1, Ordering::SeqCst);
            let listener = lock(&endpoint.srdi_listeners)
                .get(&srdi.handler_name)
                .cloned();
            match listener {
                Some(listener) => {
                    if let Err(e) = listener.schedule(srdi.clone()) {
                        warn!(peer_id = %peer_id, error = %e, "SRDI message dropped");
                    }
                }
                None => debug!(peer_id = %peer_id, handler = %srdi.handler_name, "no SRDI listener, dropped"),
            }
        }
        Ok(())
    }
}
