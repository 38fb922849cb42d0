// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! Pipe Resolver
//!
//! Resolves a pipe advertisement to the peers listening on it. Remote
//! resolution sends a `Query` through the resolver messaging service and
//! parks a [`PendingRequest`](crate::pending::PendingRequest) until an
//! `Answer` arrives or its deadline passes; whichever removes the request
//! from the table first decides the single event its listener receives.
//!
//! The same resolver answers queries from other peers by asking the local
//! pipe service implementation for the queried pipe type, and keeps the
//! SRDI index when this peer acts as a rendezvous.

use crate::adv::{PeerAdvertisement, PipeAdvertisement};
use crate::discovery::DiscoveryCache;
use crate::error::PipeError;
use crate::id::{PeerId, PipeId};
use crate::listener::Listener;
use crate::message::{PIPE_RESOLVER_NAME, PipeMsgType, PipeResolverMsg};
use crate::peer::Peer;
use crate::pending::{PendingRequestTable, ResolverEvent, ResolverEventKind};
use crate::pipe_service::PipeService;
use crate::rendezvous::RendezvousService;
use crate::resolver::{QueryHandler, ResolverQuery, ResolverResponse, ResolverService, ResolverSrdi};
use crate::srdi::{Expiration, SRDI_PIPE_KEY, SrdiEntry, SrdiIndex, SrdiMessage};
use std::sync::{Arc, Weak};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default hop limit for queries forwarded by a rendezvous
pub const DEFAULT_MAX_FORWARD_HOPS: u32 = 2;

/// Deadline horizon used when `now + timeout` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Tunables of a pipe resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Name the resolver registers its handlers under
    pub handler_name: String,
    /// Capacity of the pending-request table
    pub max_pending_requests: usize,
    /// Queue size of the response and SRDI listeners
    pub listener_queue_size: usize,
    /// Hop limit for queries forwarded through the SRDI index
    pub max_forward_hops: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            handler_name: PIPE_RESOLVER_NAME.to_string(),
            max_pending_requests: 1024,
            listener_queue_size: 64,
            max_forward_hops: DEFAULT_MAX_FORWARD_HOPS,
        }
    }
}

/// Collaborators a resolver is built from
#[derive(Clone)]
pub struct ResolverContext {
    pub local_adv: PeerAdvertisement,
    pub service: Arc<dyn ResolverService>,
    pub rendezvous: Arc<RendezvousService>,
    pub discovery: DiscoveryCache,
    pub srdi_index: Arc<SrdiIndex>,
    pub config: ResolverConfig,
}

struct ResolverInner {
    config: ResolverConfig,
    local_peer: Peer,
    local_adv_doc: Option<String>,
    service: Arc<dyn ResolverService>,
    rendezvous: Arc<RendezvousService>,
    discovery: DiscoveryCache,
    srdi_index: Arc<SrdiIndex>,
    pending: Arc<PendingRequestTable>,
    registry: Weak<PipeService>,
    shutdown: CancellationToken,
}

/// Network pipe resolver shared by the pipe service implementations
pub struct PipeResolver {
    inner: Arc<ResolverInner>,
}

impl PipeResolver {
    /// Builds a resolver; it handles no traffic until [`PipeResolver::start`]
    pub fn new(ctx: ResolverContext, registry: Weak<PipeService>) -> Self {
        let local_adv_doc = match ctx.local_adv.to_document() {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(error = %e, "local peer advertisement not serializable, queries go without it");
                None
            }
        };
        let pending = Arc::new(PendingRequestTable::new(ctx.config.max_pending_requests));

        Self {
            inner: Arc::new(ResolverInner {
                local_peer: Peer::from_advertisement(ctx.local_adv),
                local_adv_doc,
                service: ctx.service,
                rendezvous: ctx.rendezvous,
                discovery: ctx.discovery,
                srdi_index: ctx.srdi_index,
                pending,
                registry,
                shutdown: CancellationToken::new(),
                config: ctx.config,
            }),
        }
    }

    /// Registers the query handler and the response and SRDI listeners
    pub fn start(&self) -> Result<(), PipeError> {
        let inner = &self.inner;
        let name = inner.config.handler_name.as_str();

        inner
            .service
            .register_query_handler(name, inner.clone() as Arc<dyn QueryHandler>)?;

        let responses = inner.clone();
        let response_listener = Listener::spawn(inner.config.listener_queue_size, move |resp: ResolverResponse| {
            responses.process_response(resp)
        });
        inner.service.register_response_listener(name, response_listener)?;

        let srdi = inner.clone();
        let srdi_listener = Listener::spawn(inner.config.listener_queue_size, move |msg: ResolverSrdi| {
            srdi.process_srdi(msg)
        });
        inner.service.register_srdi_listener(name, srdi_listener)?;

        debug!(handler = name, "pipe resolver started");
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.inner.config.handler_name
    }

    /// Local resolution belongs to the pipe service implementations
    pub fn local_resolve(&self, _adv: &PipeAdvertisement) -> Result<Vec<Peer>, PipeError> {
        Err(PipeError::NotImplemented(
            "local resolution is done by the pipe service implementation".to_string(),
        ))
    }

    /// Issues a query for `adv` and returns without waiting
    ///
    /// `listener` receives exactly one event: `Resolved` with the answering
    /// peer, or `Timeout` once `timeout` has elapsed.
    pub fn remote_resolve(
        &self,
        adv: &PipeAdvertisement,
        timeout: Duration,
        dest: Option<&Peer>,
        listener: Listener<ResolverEvent>,
    ) -> Result<(), PipeError> {
        self.inner.submit(adv, timeout, dest, listener).map(|_| ())
    }

    /// Resolves `adv` remotely, waiting up to `timeout` for an answer
    ///
    /// Must not be awaited from a listener callback of this resolver.
    pub async fn timed_remote_resolve(
        &self,
        adv: &PipeAdvertisement,
        timeout: Duration,
        dest: Option<&Peer>,
    ) -> Result<Vec<Peer>, PipeError> {
        let (listener, mut receiver) = Listener::channel(1);
        let id = self.inner.submit(adv, timeout, dest, listener)?;

        match receiver.wait_for_event(timeout).await {
            Ok(ResolverEvent {
                kind: ResolverEventKind::Resolved,
                peers: Some(peers),
                ..
            }) => Ok(peers),
            Ok(_) => Err(PipeError::Timeout),
            Err(e) => {
                self.inner.pending.remove(&adv.id, id);
                Err(e)
            }
        }
    }

    /// Announces (`announcing`) or withdraws a local listener for `adv`
    pub fn send_srdi(
        &self,
        adv: &PipeAdvertisement,
        dest: Option<&PeerId>,
        announcing: bool,
    ) -> Result<(), PipeError> {
        self.inner.send_srdi(adv, dest, announcing)
    }

    /// Requests currently waiting for an answer
    pub fn pending(&self) -> &PendingRequestTable {
        &self.inner.pending
    }

    /// SRDI index maintained while acting as a rendezvous
    pub fn srdi_index(&self) -> &SrdiIndex {
        &self.inner.srdi_index
    }

    pub fn local_peer(&self) -> &Peer {
        &self.inner.local_peer
    }
}

impl Drop for PipeResolver {
    fn drop(&mut self) {
        let inner = &self.inner;
        let name = inner.config.handler_name.as_str();
        inner.shutdown.cancel();

        for result in [
            inner.service.unregister_query_handler(name),
            inner.service.unregister_response_listener(name),
            inner.service.unregister_srdi_listener(name),
        ] {
            if let Err(e) = result {
                debug!(handler = name, error = %e, "handler already gone");
            }
        }

        for request in inner.pending.clear() {
            let _ = request.listener.schedule(ResolverEvent::timeout(request.pipe_adv));
        }
    }
}

impl ResolverInner {
    fn local_peer_id(&self) -> &PeerId {
        &self.local_peer.peer_id
    }

    fn submit(
        &self,
        adv: &PipeAdvertisement,
        timeout: Duration,
        dest: Option<&Peer>,
        listener: Listener<ResolverEvent>,
    ) -> Result<u64, PipeError> {
        if adv.id.is_empty() {
            return Err(PipeError::InvalidArgument("pipe advertisement has no id".to_string()));
        }

        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now + FAR_FUTURE);
        let destination = dest.map(|p| p.peer_id.clone());
        let id = self
            .pending
            .insert(adv.clone(), destination.clone(), listener, deadline)?;

        if let Err(e) = self.send_pipe_query(adv, destination.as_ref()) {
            self.pending.remove(&adv.id, id);
            warn!(pipe_id = %adv.id, error = %e, "pipe query not sent");
            return Err(e);
        }

        self.spawn_deadline(adv.id.clone(), id, deadline);
        debug!(pipe_id = %adv.id, dest = ?destination, "pipe query sent");
        Ok(id)
    }

    fn spawn_deadline(&self, pipe_id: PipeId, id: u64, deadline: Instant) {
        let pending = Arc::clone(&self.pending);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    if let Some(request) = pending.remove(&pipe_id, id) {
                        debug!(pipe_id = %pipe_id, "pipe resolution timed out");
                        if let Err(e) = request.listener.schedule(ResolverEvent::timeout(request.pipe_adv)) {
                            debug!(pipe_id = %pipe_id, error = %e, "timeout event not delivered");
                        }
                    }
                }
            }
        });
    }

    fn indexed_peers(&self, adv: &PipeAdvertisement, exclude: &PeerId) -> Vec<PeerId> {
        self.srdi_index
            .search(
                &self.config.handler_name,
                adv.pipe_type.tag(),
                SRDI_PIPE_KEY,
                adv.id.as_str(),
            )
            .into_iter()
            .filter(|p| p != self.local_peer_id() && p != exclude)
            .collect()
    }

    fn send_pipe_query(&self, adv: &PipeAdvertisement, dest: Option<&PeerId>) -> Result<(), PipeError> {
        let msg = PipeResolverMsg::new_query(
            adv,
            Some(self.local_peer_id().clone()),
            self.local_adv_doc.clone(),
        );
        let query = ResolverQuery::new(
            self.config.handler_name.clone(),
            self.local_peer_id().clone(),
            msg.to_bytes()?,
        );

        if let Some(peer_id) = dest {
            self.service.send_query(query, Some(peer_id))?;
            return Ok(());
        }

        let indexed = if self.rendezvous.is_rendezvous() {
            self.indexed_peers(adv, self.local_peer_id())
        } else {
            Vec::new()
        };

        if indexed.is_empty() {
            self.service.send_query(query, None)?;
            return Ok(());
        }

        let mut last_error = None;
        let mut sent = 0;
        for peer_id in &indexed {
            match self.service.send_query(query.clone(), Some(peer_id)) {
                Ok(_) => sent += 1,
                Err(e) => {
                    warn!(pipe_id = %adv.id, peer_id = %peer_id, error = %e, "indexed peer unreachable");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if sent == 0 => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn send_srdi(
        &self,
        adv: &PipeAdvertisement,
        dest: Option<&PeerId>,
        announcing: bool,
    ) -> Result<(), PipeError> {
        let expiration = if announcing {
            Expiration::Open
        } else {
            Expiration::Close
        };
        let msg = SrdiMessage::new(
            self.local_peer_id().clone(),
            adv.pipe_type.tag(),
            vec![SrdiEntry::new(SRDI_PIPE_KEY, adv.id.as_str(), expiration)],
        );

        if self.rendezvous.is_rendezvous() {
            self.srdi_index.apply(&self.config.handler_name, &msg);
        }

        let srdi = ResolverSrdi {
            handler_name: self.config.handler_name.clone(),
            src_peer_id: self.local_peer_id().clone(),
            payload: msg.to_bytes()?,
        };
        self.service.send_srdi(srdi, dest)?;
        debug!(pipe_id = %adv.id, announcing, "SRDI sent");
        Ok(())
    }

    fn publish_sender_adv(&self, doc: Option<&str>) {
        if let Some(doc) = doc {
            if let Err(e) = self.discovery.publish_document(doc) {
                warn!(error = %e, "sender advertisement not published");
            }
        }
    }

    fn process_response(&self, resp: ResolverResponse) {
        let msg = match PipeResolverMsg::from_bytes(&resp.payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(responder = %resp.responder, error = %e, "malformed pipe resolver response dropped");
                return;
            }
        };
        if msg.msg_type != PipeMsgType::Answer {
            warn!(responder = %resp.responder, msg_type = %msg.msg_type, "unexpected message on response path");
            return;
        }

        self.publish_sender_adv(msg.peer_adv.as_deref());
        if !msg.found {
            debug!(pipe_id = %msg.pipe_id, "negative answer ignored");
            return;
        }

        let responder = msg.peer_id.clone().unwrap_or_else(|| resp.responder.clone());
        let matched = self.pending.take_matching(&msg.pipe_id, &responder);
        if matched.is_empty() {
            debug!(pipe_id = %msg.pipe_id, responder = %responder, "no pending request, answer dropped");
            return;
        }

        let mut peer = Peer::new(responder.clone());
        peer.advertisement = msg
            .peer_adv
            .as_deref()
            .and_then(|doc| PeerAdvertisement::from_document(doc).ok())
            .filter(|adv| adv.peer_id == responder);

        // The table lock is released here; listeners may call back into the resolver.
        for request in matched {
            let event = ResolverEvent::resolved(request.pipe_adv, vec![peer.clone()]);
            if let Err(e) = request.listener.schedule(event) {
                warn!(pipe_id = %msg.pipe_id, error = %e, "resolved event not delivered");
            }
        }
        debug!(pipe_id = %msg.pipe_id, responder = %responder, "pipe resolved");
    }

    fn forward_query(&self, query: &ResolverQuery, adv: &PipeAdvertisement) -> Result<(), PipeError> {
        let not_found = || PipeError::NotFound(format!("no listener for pipe {}", adv.id));
        if !self.rendezvous.is_rendezvous() || query.hop_count >= self.config.max_forward_hops {
            return Err(not_found());
        }

        let peers = self.indexed_peers(adv, &query.src_peer_id);
        if peers.is_empty() {
            return Err(not_found());
        }

        let mut forwarded = query.clone();
        forwarded.hop_count += 1;
        for peer_id in &peers {
            if let Err(e) = self.service.send_query(forwarded.clone(), Some(peer_id)) {
                warn!(pipe_id = %adv.id, peer_id = %peer_id, error = %e, "query not forwarded");
            }
        }
        debug!(pipe_id = %adv.id, count = peers.len(), "query forwarded to indexed peers");
        Ok(())
    }

    fn process_srdi(&self, srdi: ResolverSrdi) {
        if !self.rendezvous.is_rendezvous() {
            debug!(src = %srdi.src_peer_id, "not a rendezvous, SRDI message ignored");
            return;
        }
        let msg = match SrdiMessage::from_bytes(&srdi.payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(src = %srdi.src_peer_id, error = %e, "malformed SRDI message dropped");
                return;
            }
        };

        let changed = self.srdi_index.apply(&srdi.handler_name, &msg);
        debug!(src = %srdi.src_peer_id, entries = msg.entries.len(), changed, "SRDI message applied");
    }
}

impl QueryHandler for ResolverInner {
    fn process_query(&self, query: &ResolverQuery) -> Result<(), PipeError> {
        let msg = PipeResolverMsg::from_bytes(&query.payload).map_err(|e| {
            warn!(src = %query.src_peer_id, error = %e, "malformed pipe resolver query dropped");
            PipeError::InvalidArgument(e.to_string())
        })?;
        if msg.msg_type != PipeMsgType::Query {
            return Err(PipeError::InvalidArgument(format!(
                "expected Query, got {}",
                msg.msg_type
            )));
        }
        if &query.src_peer_id == self.local_peer_id() {
            return Ok(());
        }

        self.publish_sender_adv(msg.peer_adv.as_deref());
        let adv = msg.pipe_adv().map_err(PipeError::InvalidArgument)?;

        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| PipeError::Failed("pipe service stopped".to_string()))?;
        let service_impl = registry
            .get_impl_by_adv(&adv)
            .ok_or_else(|| PipeError::NotFound(format!("no pipe service for {}", adv.pipe_type)))?;

        match service_impl.local_resolve(&adv) {
            Ok(_) => {
                let answer = PipeResolverMsg::new_answer(
                    &adv,
                    self.local_peer_id().clone(),
                    self.local_adv_doc.clone(),
                );
                let response = ResolverResponse {
                    handler_name: self.config.handler_name.clone(),
                    query_id: query.query_id,
                    responder: self.local_peer_id().clone(),
                    payload: answer.to_bytes()?,
                };
                self.service.send_response(response, &query.src_peer_id)?;
                debug!(pipe_id = %adv.id, requester = %query.src_peer_id, "answered pipe query");
                Ok(())
            }
            Err(PipeError::NotFound(_)) => self.forward_query(query, &adv),
            Err(e) => Err(e),
        }
    }
}
