// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! Pipe Service
//!
//! Registry of pipe service implementations keyed by pipe type tag, and
//! the entry point other services use to accept on and resolve pipes.
//! Operations on a pipe are delegated to the implementation registered for
//! the advertisement's type.

use crate::adv::{PipeAdvertisement, PipeType};
use crate::error::PipeError;
use crate::id::PipeId;
use crate::listener::Listener;
use crate::peer::Peer;
use crate::pipe_resolver::{PipeResolver, ResolverContext};
use crate::pipes::{PipeMessage, UnicastPipeService, WirePipeService};
use crate::rendezvous::RendezvousService;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Duration;
use tracing::{debug, info};

/// A pipe flavor plugged into the [`PipeService`]
pub trait PipeServiceImpl: Send + Sync {
    /// Registry name, the pipe type tag
    fn name(&self) -> &str;

    fn pipe_type(&self) -> PipeType;

    fn add_accept_listener(
        &self,
        adv: &PipeAdvertisement,
        listener: Listener<PipeMessage>,
    ) -> Result<(), PipeError>;

    fn remove_accept_listener(
        &self,
        adv: &PipeAdvertisement,
        listener: &Listener<PipeMessage>,
    ) -> Result<(), PipeError>;

    /// Resolves against local accept sessions only
    fn local_resolve(&self, adv: &PipeAdvertisement) -> Result<Vec<Peer>, PipeError>;

    /// Resolver used for network resolution
    fn resolver(&self) -> Arc<PipeResolver>;

    /// Pipe ids with an open accept session
    fn accepted_pipes(&self) -> Vec<PipeId>;

    /// Hands an inbound message to the accept listeners of `pipe_id`
    fn deliver(&self, pipe_id: &PipeId, message: PipeMessage) -> Result<usize, PipeError>;
}

pub struct PipeService {
    resolver: Arc<PipeResolver>,
    impls: Mutex<HashMap<String, Arc<dyn PipeServiceImpl>>>,
}

impl PipeService {
    /// Creates the service and starts its resolver
    pub fn new(ctx: ResolverContext) -> Result<Arc<Self>, PipeError> {
        let service = Arc::new_cyclic(|registry| PipeService {
            resolver: Arc::new(PipeResolver::new(ctx, registry.clone())),
            impls: Mutex::new(HashMap::new()),
        });
        service.resolver.start()?;
        Ok(service)
    }

    /// Registers the unicast, secure unicast and wire implementations
    pub fn install_default_impls(&self, rendezvous: &Arc<RendezvousService>) -> Result<(), PipeError> {
        let unicast = UnicastPipeService::new(self.get_resolver(), Arc::clone(rendezvous))?;
        self.add_impl(unicast.name().to_string(), Arc::new(unicast))?;

        let secure = UnicastPipeService::new_secure(self.get_resolver(), Arc::clone(rendezvous))?;
        self.add_impl(secure.name().to_string(), Arc::new(secure))?;

        let wire = WirePipeService::new(self.get_resolver(), Arc::clone(rendezvous))?;
        self.add_impl(wire.name().to_string(), Arc::new(wire))?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn PipeServiceImpl>>> {
        self.impls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_impl(&self, name: impl Into<String>, service_impl: Arc<dyn PipeServiceImpl>) -> Result<(), PipeError> {
        let name = name.into();
        let mut impls = self.lock();
        if impls.contains_key(&name) {
            return Err(PipeError::AlreadyExists(format!("pipe service {} already registered", name)));
        }
        info!(name = %name, "pipe service implementation registered");
        impls.insert(name, service_impl);
        Ok(())
    }

    /// Unregisters `service_impl`, which must be the instance registered under `name`
    pub fn remove_impl(&self, name: &str, service_impl: &Arc<dyn PipeServiceImpl>) -> Result<(), PipeError> {
        let removed = {
            let mut impls = self.lock();
            let current = impls
                .get(name)
                .ok_or_else(|| PipeError::NotFound(format!("no pipe service {}", name)))?;
            if !Arc::ptr_eq(current, service_impl) {
                return Err(PipeError::InvalidArgument(format!(
                    "another implementation is registered as {}",
                    name
                )));
            }
            impls.remove(name)
        };
        drop(removed);
        info!(name, "pipe service implementation removed");
        Ok(())
    }

    pub fn lookup_impl(&self, name: &str) -> Option<Arc<dyn PipeServiceImpl>> {
        self.lock().get(name).cloned()
    }

    /// Implementation responsible for the advertisement's pipe type
    pub fn get_impl_by_adv(&self, adv: &PipeAdvertisement) -> Option<Arc<dyn PipeServiceImpl>> {
        self.lookup_impl(adv.pipe_type.tag())
    }

    pub fn get_resolver(&self) -> Arc<PipeResolver> {
        Arc::clone(&self.resolver)
    }

    /// The resolver is fixed at construction
    pub fn set_resolver(&self, _resolver: Arc<PipeResolver>) -> Result<(), PipeError> {
        Err(PipeError::NotImplemented("the pipe resolver cannot be replaced".to_string()))
    }

    fn impl_for(&self, adv: &PipeAdvertisement) -> Result<Arc<dyn PipeServiceImpl>, PipeError> {
        self.get_impl_by_adv(adv).ok_or_else(|| {
            PipeError::InvalidArgument(format!("no pipe service for type {}", adv.pipe_type))
        })
    }

    pub fn add_accept_listener(
        &self,
        adv: &PipeAdvertisement,
        listener: Listener<PipeMessage>,
    ) -> Result<(), PipeError> {
        self.impl_for(adv)?.add_accept_listener(adv, listener)
    }

    pub fn remove_accept_listener(
        &self,
        adv: &PipeAdvertisement,
        listener: &Listener<PipeMessage>,
    ) -> Result<(), PipeError> {
        self.impl_for(adv)?.remove_accept_listener(adv, listener)
    }

    pub fn local_resolve(&self, adv: &PipeAdvertisement) -> Result<Vec<Peer>, PipeError> {
        self.impl_for(adv)?.local_resolve(adv)
    }

    /// Resolves locally, then over the network within `timeout`
    pub async fn timed_resolve(
        &self,
        adv: &PipeAdvertisement,
        timeout: Duration,
        dest: Option<&Peer>,
    ) -> Result<Vec<Peer>, PipeError> {
        let service_impl = self.impl_for(adv)?;
        match service_impl.local_resolve(adv) {
            Ok(peers) => return Ok(peers),
            Err(PipeError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        debug!(pipe_id = %adv.id, "no local listener, resolving remotely");
        service_impl
            .resolver()
            .timed_remote_resolve(adv, timeout, dest)
            .await
    }

    pub fn deliver(&self, adv: &PipeAdvertisement, message: PipeMessage) -> Result<usize, PipeError> {
        self.impl_for(adv)?.deliver(&adv.id, message)
    }

    /// Drops every registered implementation
    pub fn stop(&self) {
        let impls: Vec<Arc<dyn PipeServiceImpl>> = self.lock().drain().map(|(_, i)| i).collect();
        debug!(count = impls.len(), "pipe service stopped");
    }
}
