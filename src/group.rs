// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! Peer group wiring
//!
//! A [`PeerGroup`] assembles the services of one peer over a messaging
//! service: rendezvous, discovery cache, SRDI index and the pipe service
//! with its default implementations.

use crate::adv::PeerAdvertisement;
use crate::config::NodeConfig;
use crate::discovery::DiscoveryCache;
use crate::error::MeshError;
use crate::id::PeerId;
use crate::listener::Listener;
use crate::pipe_resolver::{PipeResolver, ResolverContext};
use crate::pipe_service::PipeService;
use crate::rendezvous::{DEFAULT_LEASE_MARGIN, RdvEvent, RdvEventKind, RendezvousService};
use crate::resolver::ResolverService;
use crate::srdi::SrdiIndex;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::{Duration, Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const SRDI_CLEANUP_LISTENER: &str = "SrdiIndex";

pub struct PeerGroup {
    name: String,
    local_adv: PeerAdvertisement,
    rendezvous: Arc<RendezvousService>,
    discovery: DiscoveryCache,
    srdi_index: Arc<SrdiIndex>,
    pipe_service: Arc<PipeService>,
    default_timeout: Duration,
    /// Cancels the discovery purge loop while started
    maintenance: Mutex<Option<CancellationToken>>,
}

impl PeerGroup {
    /// Builds the services of the peer described by `config`
    ///
    /// `service` must send as the configured peer id.
    pub fn new(config: &NodeConfig, service: Arc<dyn ResolverService>) -> Result<Self, MeshError> {
        let peer_id = config.peer.peer_id();
        if service.local_peer_id() != &peer_id {
            return Err(MeshError::Config(format!(
                "messaging service sends as {}, configured peer is {}",
                service.local_peer_id(),
                peer_id
            )));
        }

        let mut local_adv = PeerAdvertisement::new(peer_id, config.peer.name.clone());
        local_adv.group = config.peer.group.clone();
        local_adv.endpoints = config.peer.endpoints.clone();

        let rendezvous = Arc::new(RendezvousService::new(
            local_adv.clone(),
            config.rendezvous.to_rendezvous_configuration(),
        ));
        let discovery = DiscoveryCache::with_lifetime(config.resolver.adv_lifetime());
        let srdi_index = Arc::new(SrdiIndex::new());

        let pipe_service = PipeService::new(ResolverContext {
            local_adv: local_adv.clone(),
            service,
            rendezvous: Arc::clone(&rendezvous),
            discovery: discovery.clone(),
            srdi_index: Arc::clone(&srdi_index),
            config: config.resolver_config(),
        })?;
        pipe_service.install_default_impls(&rendezvous)?;

        Ok(Self {
            name: config.peer.group.clone(),
            local_adv,
            rendezvous,
            discovery,
            srdi_index,
            pipe_service,
            default_timeout: config.resolver.default_timeout(),
            maintenance: Mutex::new(None),
        })
    }

    /// Starts the rendezvous service and drops index entries of departing peers
    pub fn start(&self) -> Result<(), MeshError> {
        let index = Arc::clone(&self.srdi_index);
        let cleanup = Listener::spawn(16, move |event: RdvEvent| {
            let departed = matches!(
                event.kind,
                RdvEventKind::Disconnected | RdvEventKind::ClientDisconnected | RdvEventKind::Failed
            );
            if let (true, Some(peer_id)) = (departed, event.peer) {
                let removed = index.remove_peer(&peer_id);
                debug!(peer_id = %peer_id, removed, "SRDI entries of departed peer dropped");
            }
        });
        self.rendezvous
            .add_event_listener(SRDI_CLEANUP_LISTENER, Some(&self.name), cleanup)?;

        self.rendezvous.start();

        let period = self
            .rendezvous
            .config()
            .lease_margin
            .unwrap_or(DEFAULT_LEASE_MARGIN);
        let token = CancellationToken::new();
        tokio::spawn(purge_loop(self.discovery.clone(), period, token.clone()));
        if let Some(previous) = self.maintenance().replace(token) {
            previous.cancel();
        }

        info!(group = %self.name, peer_id = %self.local_adv.peer_id, "peer group started");
        Ok(())
    }

    /// Stops answering pipe queries and halts the background loops
    pub fn stop(&self) {
        if let Some(token) = self.maintenance().take() {
            token.cancel();
        }
        self.pipe_service.stop();
        self.rendezvous.stop();
        if let Err(e) = self
            .rendezvous
            .remove_event_listener(SRDI_CLEANUP_LISTENER, Some(&self.name))
        {
            debug!(error = %e, "SRDI cleanup listener already gone");
        }
        info!(group = %self.name, peer_id = %self.local_adv.peer_id, "peer group stopped");
    }

    fn maintenance(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.maintenance.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.local_adv.peer_id
    }

    pub fn local_advertisement(&self) -> &PeerAdvertisement {
        &self.local_adv
    }

    pub fn rendezvous(&self) -> &Arc<RendezvousService> {
        &self.rendezvous
    }

    pub fn discovery(&self) -> &DiscoveryCache {
        &self.discovery
    }

    pub fn srdi_index(&self) -> &Arc<SrdiIndex> {
        &self.srdi_index
    }

    pub fn pipe_service(&self) -> &Arc<PipeService> {
        &self.pipe_service
    }

    pub fn resolver(&self) -> Arc<PipeResolver> {
        self.pipe_service.get_resolver()
    }

    /// Timeout from the `[resolver]` config section
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}

impl Drop for PeerGroup {
    fn drop(&mut self) {
        if let Some(token) = self.maintenance().take() {
            token.cancel();
        }
    }
}

async fn purge_loop(discovery: DiscoveryCache, period: Duration, token: CancellationToken) {
    let mut ticker = interval(period.max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let purged = discovery.purge_expired(Instant::now());
                if purged > 0 {
                    debug!(count = purged, "purged expired peer advertisements");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adv::{PipeAdvertisement, PipeType};
    use crate::loopback::LoopbackNetwork;
    use crate::srdi::{Expiration, SRDI_PIPE_KEY, SrdiEntry, SrdiMessage};

    fn config(name: &str) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.peer.name = name.to_string();
        config
    }

    #[tokio::test]
    async fn test_mismatched_peer_id_rejected() {
        let network = LoopbackNetwork::new();
        let result = PeerGroup::new(&config("a"), network.join("urn:jxta:other"));
        assert!(matches!(result, Err(MeshError::Config(_))));
    }

    #[tokio::test]
    async fn test_default_impls_installed() {
        let network = LoopbackNetwork::new();
        let group = PeerGroup::new(&config("a"), network.join("urn:jxta:a")).unwrap();

        for pipe_type in PipeType::all() {
            let adv = PipeAdvertisement::new("urn:pipe:x", pipe_type);
            assert!(group.pipe_service().get_impl_by_adv(&adv).is_some());
        }
        assert_eq!(group.name(), "NetPeerGroup");
        assert_eq!(group.default_timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_disconnect_drops_index_entries() {
        let network = LoopbackNetwork::new();
        let mut cfg = config("rdv");
        cfg.rendezvous.config = "rendezvous".to_string();
        let group = PeerGroup::new(&cfg, network.join("urn:jxta:rdv")).unwrap();
        group.start().unwrap();

        let edge = PeerId::from("urn:jxta:edge");
        group.srdi_index().apply(
            "JxtaPipeResolver",
            &SrdiMessage::new(
                edge.clone(),
                "JxtaUnicast",
                vec![SrdiEntry::new(SRDI_PIPE_KEY, "urn:pipe:1", Expiration::Open)],
            ),
        );
        group
            .rendezvous()
            .connect_peer(crate::peer::Peer::new(edge.clone()), None)
            .unwrap();
        group.rendezvous().disconnect_peer(&edge);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(group.srdi_index().count(), 0);
        group.stop();
    }

    #[tokio::test]
    async fn test_lease_failure_drops_index_entries() {
        let network = LoopbackNetwork::new();
        let mut cfg = config("rdv");
        cfg.rendezvous.config = "rendezvous".to_string();
        let group = PeerGroup::new(&cfg, network.join("urn:jxta:rdv")).unwrap();
        group.start().unwrap();

        let edge = PeerId::from("urn:jxta:edge");
        group.srdi_index().apply(
            "JxtaPipeResolver",
            &SrdiMessage::new(
                edge.clone(),
                "JxtaUnicast",
                vec![SrdiEntry::new(SRDI_PIPE_KEY, "urn:pipe:1", Expiration::Open)],
            ),
        );
        group
            .rendezvous()
            .connect_peer(crate::peer::Peer::new(edge.clone()), None)
            .unwrap();

        let (listener, mut events) = Listener::channel(4);
        group.rendezvous().add_event_listener("test", None, listener).unwrap();
        assert!(group.rendezvous().lease_failed(&edge).is_some());

        let event = events.wait_for_event(Duration::from_millis(100)).await.unwrap();
        assert_eq!(event.kind, RdvEventKind::Failed);
        assert_eq!(event.peer, Some(edge));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(group.srdi_index().count(), 0);
        group.stop();
    }

    #[tokio::test]
    async fn test_expired_advertisements_purged_in_background() {
        let network = LoopbackNetwork::new();
        let mut cfg = config("a");
        cfg.rendezvous.lease_margin = 20;
        cfg.resolver.adv_lifetime_ms = 50;
        let group = PeerGroup::new(&cfg, network.join("urn:jxta:a")).unwrap();
        group.start().unwrap();

        group
            .discovery()
            .publish(PeerAdvertisement::new("urn:jxta:b", "b"));
        assert_eq!(group.discovery().count(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(group.discovery().count(), 0);
        group.stop();
    }

    #[tokio::test]
    async fn test_stopped_group_no_longer_answers() {
        let network = LoopbackNetwork::new();
        let client = PeerGroup::new(&config("a"), network.join("urn:jxta:a")).unwrap();
        let server = PeerGroup::new(&config("b"), network.join("urn:jxta:b")).unwrap();
        client.start().unwrap();
        server.start().unwrap();

        let pipe = PipeAdvertisement::new("urn:pipe:stop", PipeType::Unicast);
        server
            .pipe_service()
            .add_accept_listener(&pipe, Listener::channel(1).0)
            .unwrap();
        let peers = client
            .resolver()
            .timed_remote_resolve(&pipe, Duration::from_secs(1), None)
            .await
            .unwrap();
        assert_eq!(&peers[0].peer_id, server.peer_id());

        server.stop();
        assert!(server.pipe_service().get_impl_by_adv(&pipe).is_none());
        let result = client
            .resolver()
            .timed_remote_resolve(&pipe, Duration::from_millis(200), None)
            .await;
        assert_eq!(result, Err(crate::error::PipeError::Timeout));
        client.stop();
    }
}
