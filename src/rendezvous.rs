// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! Rendezvous Service
//!
//! Tracks this peer's overlay role, its lease table and its peerview, and
//! notifies dependent services of membership changes through registered
//! event listeners.
//!
//! Roles are `adhoc` (no overlay), `client` (edge) and `rendezvous`. When
//! auto-rendezvous is enabled the status is reported as auto-edge or
//! auto-rendezvous and a background loop may switch between the two based
//! on a [`RendezvousFitness`] signal.

use crate::adv::PeerAdvertisement;
use crate::error::RendezvousError;
use crate::id::{EndpointAddress, PeerId};
use crate::listener::Listener;
use crate::peer::Peer;
use crate::peerview::{DEFAULT_HAPPY_SIZE, Peerview, ViewChange};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::time::{Duration, Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Auto-rendezvous check period used when the interval is configured as 0
pub const DEFAULT_AUTO_RDV_INTERVAL: Duration = Duration::from_secs(30);
/// Intervals below this are accepted but logged
pub const MIN_AUTO_RDV_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(20 * 60);
/// Period of the lease purge loop
pub const DEFAULT_LEASE_MARGIN: Duration = Duration::from_secs(5);

/// Ticks an auto-switch must wait after the previous switch
const SWITCH_HOLD_TICKS: u32 = 2;
const MIN_LOOP_PERIOD: Duration = Duration::from_millis(10);

/// Configured overlay role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RdvRole {
    #[serde(rename = "adhoc")]
    AdHoc,
    #[serde(rename = "client", alias = "edge")]
    Edge,
    #[serde(rename = "rendezvous")]
    Rendezvous,
}

impl RdvRole {
    /// Parses a configuration value, falling back to `client`
    pub fn from_config_str(s: &str) -> Self {
        s.parse().unwrap_or_else(|e| {
            warn!(error = %e, "unrecognized rendezvous config, using client");
            RdvRole::Edge
        })
    }
}

impl fmt::Display for RdvRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RdvRole::AdHoc => write!(f, "adhoc"),
            RdvRole::Edge => write!(f, "client"),
            RdvRole::Rendezvous => write!(f, "rendezvous"),
        }
    }
}

impl std::str::FromStr for RdvRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "adhoc" => Ok(RdvRole::AdHoc),
            "client" | "edge" => Ok(RdvRole::Edge),
            "rendezvous" => Ok(RdvRole::Rendezvous),
            _ => Err(format!(
                "Invalid rendezvous config: {}. Use 'adhoc', 'client', or 'rendezvous'",
                s
            )),
        }
    }
}

/// Observed status, the role plus whether auto-switching is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdvStatus {
    AdHoc,
    Edge,
    AutoEdge,
    AutoRendezvous,
    Rendezvous,
}

impl RdvStatus {
    pub fn for_role(role: RdvRole, auto: bool) -> Self {
        match (role, auto) {
            (RdvRole::AdHoc, _) => RdvStatus::AdHoc,
            (RdvRole::Edge, false) => RdvStatus::Edge,
            (RdvRole::Edge, true) => RdvStatus::AutoEdge,
            (RdvRole::Rendezvous, false) => RdvStatus::Rendezvous,
            (RdvRole::Rendezvous, true) => RdvStatus::AutoRendezvous,
        }
    }

    pub fn role(&self) -> RdvRole {
        match self {
            RdvStatus::AdHoc => RdvRole::AdHoc,
            RdvStatus::Edge | RdvStatus::AutoEdge => RdvRole::Edge,
            RdvStatus::Rendezvous | RdvStatus::AutoRendezvous => RdvRole::Rendezvous,
        }
    }

    pub fn is_rendezvous(&self) -> bool {
        self.role() == RdvRole::Rendezvous
    }
}

impl fmt::Display for RdvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RdvStatus::AdHoc => write!(f, "adhoc"),
            RdvStatus::Edge => write!(f, "edge"),
            RdvStatus::AutoEdge => write!(f, "auto-edge"),
            RdvStatus::AutoRendezvous => write!(f, "auto-rendezvous"),
            RdvStatus::Rendezvous => write!(f, "rendezvous"),
        }
    }
}

/// Typed rendezvous configuration; `None` stands for a disabled or unset value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendezvousConfiguration {
    pub role: RdvRole,
    pub auto_rendezvous_check_interval: Option<Duration>,
    pub lease_duration: Option<Duration>,
    pub lease_margin: Option<Duration>,
    pub max_clients: Option<u32>,
    pub max_ttl: Option<u32>,
    pub probe_relays: bool,
    pub min_happy_peerview: Option<usize>,
    pub seeds: Vec<EndpointAddress>,
    pub seeding: Vec<EndpointAddress>,
    pub use_only_seeds: bool,
    pub connect_delay: Option<Duration>,
}

impl RendezvousConfiguration {
    pub fn with_role(role: RdvRole) -> Self {
        Self {
            role,
            ..Self::default()
        }
    }

    pub fn happy_size(&self) -> usize {
        self.min_happy_peerview.unwrap_or(DEFAULT_HAPPY_SIZE)
    }
}

impl Default for RendezvousConfiguration {
    fn default() -> Self {
        Self {
            role: RdvRole::Edge,
            auto_rendezvous_check_interval: None,
            lease_duration: None,
            lease_margin: None,
            max_clients: None,
            max_ttl: None,
            probe_relays: true,
            min_happy_peerview: None,
            seeds: Vec::new(),
            seeding: Vec::new(),
            use_only_seeds: false,
            connect_delay: None,
        }
    }
}

/// Kind of membership change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdvEventKind {
    Connected,
    Reconnected,
    Failed,
    Disconnected,
    ClientConnected,
    ClientReconnected,
    ClientDisconnected,
    BecameEdge,
    BecameRendezvous,
}

impl RdvEventKind {
    /// Whether the event concerns a single peer rather than the local role
    pub fn is_peer_event(&self) -> bool {
        !matches!(self, RdvEventKind::BecameEdge | RdvEventKind::BecameRendezvous)
    }
}

impl fmt::Display for RdvEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RdvEventKind::Connected => "connected",
            RdvEventKind::Reconnected => "reconnected",
            RdvEventKind::Failed => "failed",
            RdvEventKind::Disconnected => "disconnected",
            RdvEventKind::ClientConnected => "client-connected",
            RdvEventKind::ClientReconnected => "client-reconnected",
            RdvEventKind::ClientDisconnected => "client-disconnected",
            RdvEventKind::BecameEdge => "became-edge",
            RdvEventKind::BecameRendezvous => "became-rendezvous",
        };
        f.write_str(name)
    }
}

/// Membership change delivered to event listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdvEvent {
    pub kind: RdvEventKind,
    /// Affected peer, set for peer-level events only
    pub peer: Option<PeerId>,
}

/// Inputs to the auto-rendezvous decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitnessInput {
    pub status: RdvStatus,
    pub localview_size: usize,
    pub happy_size: usize,
    pub client_count: usize,
}

/// Decides whether this peer should act as a rendezvous
pub trait RendezvousFitness: Send + Sync {
    fn wants_rendezvous(&self, input: &FitnessInput) -> bool;
}

/// Wants rendezvous duty while the peerview is below its happy size
#[derive(Debug, Default, Clone, Copy)]
pub struct PeerviewHappiness;

impl RendezvousFitness for PeerviewHappiness {
    fn wants_rendezvous(&self, input: &FitnessInput) -> bool {
        input.localview_size < input.happy_size
    }
}

struct RdvState {
    config: RendezvousConfiguration,
    status: RdvStatus,
    peerview: Option<Arc<Peerview>>,
    leases: BTreeMap<PeerId, Peer>,
    listeners: HashMap<String, Listener<RdvEvent>>,
    /// Set while started; parent of every background loop
    running: Option<CancellationToken>,
    auto_task: Option<CancellationToken>,
    ticks_since_switch: u32,
}

/// Rendezvous service of one peer
pub struct RendezvousService {
    self_peer: Peer,
    fitness: Arc<dyn RendezvousFitness>,
    state: Mutex<RdvState>,
}

fn listener_key(service_name: &str, param: Option<&str>) -> String {
    format!("{}{}", service_name, param.unwrap_or(""))
}

impl RendezvousService {
    pub fn new(self_adv: PeerAdvertisement, config: RendezvousConfiguration) -> Self {
        let self_peer = Peer::from_advertisement(self_adv);
        let status = RdvStatus::for_role(config.role, config.auto_rendezvous_check_interval.is_some());
        let peerview = match config.role {
            RdvRole::AdHoc => None,
            _ => Some(Arc::new(Peerview::new(self_peer.clone(), config.happy_size()))),
        };

        Self {
            self_peer,
            fitness: Arc::new(PeerviewHappiness),
            state: Mutex::new(RdvState {
                config,
                status,
                peerview,
                leases: BTreeMap::new(),
                listeners: HashMap::new(),
                running: None,
                auto_task: None,
                ticks_since_switch: 0,
            }),
        }
    }

    /// Replaces the auto-rendezvous fitness signal
    pub fn with_fitness(mut self, fitness: Arc<dyn RendezvousFitness>) -> Self {
        self.fitness = fitness;
        self
    }

    fn lock(&self) -> MutexGuard<'_, RdvState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts the lease loop and, when enabled, the auto-rendezvous loop
    pub fn start(self: &Arc<Self>) {
        let mut state = self.lock();
        if state.running.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let margin = state.config.lease_margin.unwrap_or(DEFAULT_LEASE_MARGIN);
        tokio::spawn(lease_loop(Arc::downgrade(self), margin, token.child_token()));

        if state.status != RdvStatus::AdHoc {
            if let Some(period) = state.config.auto_rendezvous_check_interval {
                state.auto_task = Some(self.spawn_auto_loop(period, &token));
            }
        }
        state.running = Some(token);
        info!(peer_id = %self.self_peer.peer_id, status = %state.status, "rendezvous service started");
    }

    /// Stops the background loops; views become unavailable until restarted
    pub fn stop(&self) {
        let mut state = self.lock();
        if let Some(token) = state.running.take() {
            token.cancel();
            info!(peer_id = %self.self_peer.peer_id, "rendezvous service stopped");
        }
        state.auto_task = None;
    }

    pub fn is_running(&self) -> bool {
        self.lock().running.is_some()
    }

    fn spawn_auto_loop(self: &Arc<Self>, period: Duration, parent: &CancellationToken) -> CancellationToken {
        let token = parent.child_token();
        tokio::spawn(auto_rdv_loop(Arc::downgrade(self), period, token.clone()));
        token
    }

    pub fn get_self_peer(&self) -> Peer {
        self.self_peer.clone()
    }

    pub fn config(&self) -> RendezvousConfiguration {
        self.lock().config.clone()
    }

    pub fn status(&self) -> RdvStatus {
        self.lock().status
    }

    pub fn is_rendezvous(&self) -> bool {
        self.status().is_rendezvous()
    }

    pub fn auto_interval(&self) -> Option<Duration> {
        self.lock().config.auto_rendezvous_check_interval
    }

    /// Seed addresses, followed by the addresses of seeding documents
    pub fn seeds(&self) -> Vec<EndpointAddress> {
        let state = self.lock();
        state
            .config
            .seeds
            .iter()
            .chain(state.config.seeding.iter())
            .cloned()
            .collect()
    }

    /// Sets the auto-rendezvous interval in milliseconds
    ///
    /// `0` selects the default interval and any negative value disables
    /// auto-switching. The status is recomputed and a running auto loop
    /// is restarted with the new period.
    pub fn set_auto_interval(self: &Arc<Self>, interval_ms: i64) {
        let interval = match interval_ms {
            ms if ms < 0 => None,
            0 => Some(DEFAULT_AUTO_RDV_INTERVAL),
            ms => Some(Duration::from_millis(ms as u64)),
        };
        if let Some(period) = interval {
            if period < MIN_AUTO_RDV_INTERVAL {
                warn!(interval_ms = period.as_millis() as u64, "suspiciously low auto-rendezvous interval");
            }
        }

        let mut state = self.lock();
        state.config.auto_rendezvous_check_interval = interval;
        let role = state.status.role();
        state.status = RdvStatus::for_role(role, interval.is_some());

        if let Some(task) = state.auto_task.take() {
            task.cancel();
        }
        if role != RdvRole::AdHoc {
            if let (Some(running), Some(period)) = (state.running.clone(), interval) {
                state.auto_task = Some(self.spawn_auto_loop(period, &running));
            }
        }
        debug!(status = %state.status, "auto-rendezvous interval updated");
    }

    /// Requests a role change
    ///
    /// Unchanged roles are a no-op. Ad-hoc peers cannot change role, and
    /// switching between edge and rendezvous needs auto-rendezvous enabled.
    pub fn set_config(&self, role: RdvRole) -> Result<(), RendezvousError> {
        let kind = {
            let mut state = self.lock();
            let current = state.status.role();
            if current == role {
                return Ok(());
            }
            if current == RdvRole::AdHoc
                || role == RdvRole::AdHoc
                || state.config.auto_rendezvous_check_interval.is_none()
            {
                return Err(RendezvousError::InvalidTransition {
                    from: current.to_string(),
                    to: role.to_string(),
                });
            }
            self.apply_role(&mut state, role)
        };

        self.generate_event(kind, None);
        Ok(())
    }

    fn apply_role(&self, state: &mut RdvState, role: RdvRole) -> RdvEventKind {
        let auto = state.config.auto_rendezvous_check_interval.is_some();
        state.status = RdvStatus::for_role(role, auto);
        state.config.role = role;
        state.ticks_since_switch = 0;

        // Leases are held with rendezvous as an edge and with clients as a
        // rendezvous; neither survives a role change.
        let dropped = state.leases.len();
        state.leases.clear();
        info!(status = %state.status, dropped_leases = dropped, "rendezvous role changed");

        match role {
            RdvRole::Rendezvous => RdvEventKind::BecameRendezvous,
            _ => RdvEventKind::BecameEdge,
        }
    }

    /// Runs one auto-rendezvous evaluation, returning the new role if it switched
    pub fn auto_rendezvous_tick(&self) -> Option<RdvRole> {
        let input = {
            let mut state = self.lock();
            if state.status == RdvStatus::AdHoc
                || state.config.auto_rendezvous_check_interval.is_none()
            {
                return None;
            }
            state.ticks_since_switch = state.ticks_since_switch.saturating_add(1);
            FitnessInput {
                status: state.status,
                localview_size: state.peerview.as_ref().map_or(0, |pv| pv.localview_size()),
                happy_size: state.config.happy_size(),
                client_count: if state.status.is_rendezvous() {
                    state.leases.len()
                } else {
                    0
                },
            }
        };

        let target = if self.fitness.wants_rendezvous(&input) {
            RdvRole::Rendezvous
        } else {
            RdvRole::Edge
        };

        let kind = {
            let mut state = self.lock();
            if state.status != input.status
                || target == state.status.role()
                || state.ticks_since_switch <= SWITCH_HOLD_TICKS
            {
                return None;
            }
            self.apply_role(&mut state, target)
        };

        self.generate_event(kind, None);
        Some(target)
    }

    /// Registers a listener under `service_name` + `param`
    pub fn add_event_listener(
        &self,
        service_name: &str,
        param: Option<&str>,
        listener: Listener<RdvEvent>,
    ) -> Result<(), RendezvousError> {
        let key = listener_key(service_name, param);
        let mut state = self.lock();
        if state.listeners.contains_key(&key) {
            return Err(RendezvousError::Busy(key));
        }
        state.listeners.insert(key, listener);
        Ok(())
    }

    pub fn remove_event_listener(
        &self,
        service_name: &str,
        param: Option<&str>,
    ) -> Result<Listener<RdvEvent>, RendezvousError> {
        let key = listener_key(service_name, param);
        self.lock()
            .listeners
            .remove(&key)
            .ok_or(RendezvousError::NoListener(key))
    }

    /// Schedules an event on every registered listener
    ///
    /// Returns the number of listeners that accepted it.
    pub fn generate_event(&self, kind: RdvEventKind, peer: Option<PeerId>) -> usize {
        let listeners: Vec<Listener<RdvEvent>> = self.lock().listeners.values().cloned().collect();
        let event = RdvEvent { kind, peer };
        debug!(kind = %event.kind, peer = ?event.peer, listeners = listeners.len(), "rendezvous event");

        let mut delivered = 0;
        for listener in listeners {
            match listener.schedule(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(kind = %event.kind, error = %e, "rendezvous event not delivered"),
            }
        }
        delivered
    }

    /// Grants or renews a lease for `peer`
    ///
    /// Uses the configured lease duration when `lease` is None.
    pub fn connect_peer(&self, peer: Peer, lease: Option<Duration>) -> Result<RdvEventKind, RendezvousError> {
        let (kind, peer_id) = {
            let mut state = self.lock();
            if state.status == RdvStatus::AdHoc {
                return Err(RendezvousError::AdHocMode);
            }
            let duration = lease
                .or(state.config.lease_duration)
                .unwrap_or(DEFAULT_LEASE_DURATION);
            let as_rendezvous = state.status.is_rendezvous();
            let known = state.leases.contains_key(&peer.peer_id);

            if as_rendezvous && !known {
                if let Some(max) = state.config.max_clients {
                    if state.leases.len() >= max as usize {
                        return Err(RendezvousError::ClientLimit(max));
                    }
                }
            }

            let peer_id = peer.peer_id.clone();
            state
                .leases
                .insert(peer_id.clone(), peer.with_lease(Instant::now(), duration));

            let kind = match (as_rendezvous, known) {
                (false, false) => RdvEventKind::Connected,
                (false, true) => RdvEventKind::Reconnected,
                (true, false) => RdvEventKind::ClientConnected,
                (true, true) => RdvEventKind::ClientReconnected,
            };
            (kind, peer_id)
        };

        self.generate_event(kind, Some(peer_id));
        Ok(kind)
    }

    fn disconnect_kind(&self) -> RdvEventKind {
        if self.is_rendezvous() {
            RdvEventKind::ClientDisconnected
        } else {
            RdvEventKind::Disconnected
        }
    }

    /// Ends the lease of `peer_id`
    pub fn disconnect_peer(&self, peer_id: &PeerId) -> Option<Peer> {
        let removed = self.lock().leases.remove(peer_id)?;
        self.generate_event(self.disconnect_kind(), Some(peer_id.clone()));
        Some(removed)
    }

    /// Drops the lease of a peer that could not be renewed
    pub fn lease_failed(&self, peer_id: &PeerId) -> Option<Peer> {
        let removed = self.lock().leases.remove(peer_id)?;
        self.generate_event(RdvEventKind::Failed, Some(peer_id.clone()));
        Some(removed)
    }

    /// Removes every lease expired at `now`
    pub fn purge_expired(&self, now: Instant) -> Vec<PeerId> {
        let expired: Vec<PeerId> = {
            let mut state = self.lock();
            let expired: Vec<PeerId> = state
                .leases
                .values()
                .filter(|p| p.is_expired_at(now))
                .map(|p| p.peer_id.clone())
                .collect();
            for peer_id in &expired {
                state.leases.remove(peer_id);
            }
            expired
        };

        if !expired.is_empty() {
            let kind = self.disconnect_kind();
            for peer_id in &expired {
                self.generate_event(kind, Some(peer_id.clone()));
            }
        }
        expired
    }

    /// Lease table, expired entries included
    pub fn get_peers(&self) -> Vec<Peer> {
        self.lock().leases.values().cloned().collect()
    }

    pub fn peer_is_connected(&self, peer_id: &PeerId) -> bool {
        let now = Instant::now();
        self.lock()
            .leases
            .get(peer_id)
            .is_some_and(|p| p.is_connected_at(now))
    }

    pub fn lease_remaining(&self, peer_id: &PeerId) -> Option<Duration> {
        let now = Instant::now();
        self.lock()
            .leases
            .get(peer_id)
            .and_then(|p| p.remaining_at(now))
    }

    /// The peerview, None in ad-hoc mode or while stopped
    pub fn get_peerview(&self) -> Option<Arc<Peerview>> {
        let state = self.lock();
        state.running.as_ref()?;
        state.peerview.clone()
    }

    pub fn get_localview(&self) -> Result<Vec<Peer>, RendezvousError> {
        let state = self.lock();
        if state.running.is_none() {
            return Err(RendezvousError::NotRunning);
        }
        state
            .peerview
            .as_ref()
            .map(|pv| pv.get_localview())
            .ok_or(RendezvousError::NoPeerview)
    }

    pub fn get_globalview(&self) -> Result<Vec<Peer>, RendezvousError> {
        let state = self.lock();
        if state.running.is_none() {
            return Err(RendezvousError::NotRunning);
        }
        state
            .peerview
            .as_ref()
            .map(|pv| pv.get_globalview())
            .ok_or(RendezvousError::NoPeerview)
    }

    /// Neighbor count, zero when there is no peerview
    pub fn localview_size(&self) -> usize {
        self.get_peerview().map_or(0, |pv| pv.localview_size())
    }

    fn peerview(&self) -> Result<Arc<Peerview>, RendezvousError> {
        self.lock().peerview.clone().ok_or(RendezvousError::NoPeerview)
    }

    /// Adds an overlay neighbor; a new neighbor emits `Connected`
    pub fn add_neighbor(&self, peer: Peer) -> Result<bool, RendezvousError> {
        let peerview = self.peerview()?;
        let peer_id = peer.peer_id.clone();
        let added = peerview.add_local_peer(peer);
        if added {
            info!(peer_id = %peer_id, "peerview neighbor added");
            self.generate_event(RdvEventKind::Connected, Some(peer_id));
        }
        Ok(added)
    }

    /// Removes an overlay neighbor; emits `Disconnected` if it was present
    pub fn remove_neighbor(&self, peer_id: &PeerId) -> Result<Option<Peer>, RendezvousError> {
        let peerview = self.peerview()?;
        let removed = peerview.remove_local_peer(peer_id);
        if removed.is_some() {
            info!(peer_id = %peer_id, "peerview neighbor removed");
            self.generate_event(RdvEventKind::Disconnected, Some(peer_id.clone()));
        }
        Ok(removed)
    }

    pub fn reconcile_globalview(&self, members: Vec<Peer>) -> Result<ViewChange, RendezvousError> {
        Ok(self.peerview()?.reconcile_globalview(members))
    }
}

impl Drop for RendezvousService {
    fn drop(&mut self) {
        if let Some(token) = self.lock().running.take() {
            token.cancel();
        }
    }
}

async fn lease_loop(service: Weak<RendezvousService>, period: Duration, token: CancellationToken) {
    let mut ticker = interval(period.max(MIN_LOOP_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(service) = service.upgrade() else { break };
                let purged = service.purge_expired(Instant::now());
                if !purged.is_empty() {
                    debug!(count = purged.len(), "purged expired leases");
                }
            }
        }
    }
}

async fn auto_rdv_loop(service: Weak<RendezvousService>, period: Duration, token: CancellationToken) {
    let mut ticker = interval(period.max(MIN_LOOP_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(service) = service.upgrade() else { break };
                if let Some(role) = service.auto_rendezvous_tick() {
                    info!(role = %role, "auto-rendezvous switched role");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(role: RdvRole) -> RendezvousService {
        RendezvousService::new(
            PeerAdvertisement::new("urn:peer:self", "self"),
            RendezvousConfiguration::with_role(role),
        )
    }

    fn events() -> (Listener<RdvEvent>, crate::listener::ListenerReceiver<RdvEvent>) {
        Listener::channel(16)
    }

    struct Always(bool);

    impl RendezvousFitness for Always {
        fn wants_rendezvous(&self, _input: &FitnessInput) -> bool {
            self.0
        }
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("adhoc".parse::<RdvRole>(), Ok(RdvRole::AdHoc));
        assert_eq!("client".parse::<RdvRole>(), Ok(RdvRole::Edge));
        assert_eq!("Rendezvous".parse::<RdvRole>(), Ok(RdvRole::Rendezvous));
        assert_eq!(RdvRole::from_config_str("relay"), RdvRole::Edge);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(RdvStatus::for_role(RdvRole::Edge, true), RdvStatus::AutoEdge);
        assert_eq!(RdvStatus::for_role(RdvRole::Rendezvous, true), RdvStatus::AutoRendezvous);
        assert_eq!(RdvStatus::for_role(RdvRole::AdHoc, true), RdvStatus::AdHoc);
        assert!(RdvStatus::AutoRendezvous.is_rendezvous());
        assert!(!RdvStatus::AutoEdge.is_rendezvous());
    }

    #[test]
    fn test_set_config_requires_auto() {
        let rdv = service(RdvRole::Edge);
        assert!(matches!(
            rdv.set_config(RdvRole::Rendezvous),
            Err(RendezvousError::InvalidTransition { .. })
        ));
        assert_eq!(rdv.set_config(RdvRole::Edge), Ok(()));
    }

    #[test]
    fn test_adhoc_is_terminal() {
        let mut config = RendezvousConfiguration::with_role(RdvRole::AdHoc);
        config.auto_rendezvous_check_interval = Some(DEFAULT_AUTO_RDV_INTERVAL);
        let rdv = RendezvousService::new(PeerAdvertisement::new("urn:peer:self", "self"), config);

        assert_eq!(rdv.status(), RdvStatus::AdHoc);
        assert!(rdv.set_config(RdvRole::Edge).is_err());
        assert_eq!(rdv.auto_rendezvous_tick(), None);
        assert!(matches!(
            rdv.connect_peer(Peer::new("urn:peer:x"), None),
            Err(RendezvousError::AdHocMode)
        ));
    }

    #[tokio::test]
    async fn test_set_auto_interval_updates_status() {
        let rdv = Arc::new(service(RdvRole::Rendezvous));
        rdv.set_auto_interval(0);
        assert_eq!(rdv.auto_interval(), Some(DEFAULT_AUTO_RDV_INTERVAL));
        assert_eq!(rdv.status(), RdvStatus::AutoRendezvous);

        rdv.set_auto_interval(-1);
        assert_eq!(rdv.auto_interval(), None);
        assert_eq!(rdv.status(), RdvStatus::Rendezvous);
    }

    #[tokio::test]
    async fn test_set_config_emits_role_event() {
        let rdv = Arc::new(service(RdvRole::Edge));
        rdv.set_auto_interval(60_000);
        let (listener, mut rx) = events();
        rdv.add_event_listener("test", None, listener).unwrap();

        rdv.set_config(RdvRole::Rendezvous).unwrap();
        assert_eq!(rdv.status(), RdvStatus::AutoRendezvous);

        let event = rx.wait_for_event(Duration::from_millis(100)).await.unwrap();
        assert_eq!(event.kind, RdvEventKind::BecameRendezvous);
        assert_eq!(event.peer, None);
    }

    #[tokio::test]
    async fn test_auto_tick_holds_after_switch() {
        let rdv = Arc::new(
            service(RdvRole::Edge).with_fitness(Arc::new(Always(true))),
        );
        rdv.set_auto_interval(60_000);

        assert_eq!(rdv.auto_rendezvous_tick(), None);
        assert_eq!(rdv.auto_rendezvous_tick(), None);
        assert_eq!(rdv.auto_rendezvous_tick(), Some(RdvRole::Rendezvous));
        assert!(rdv.is_rendezvous());
        // fitness already satisfied
        assert_eq!(rdv.auto_rendezvous_tick(), None);
    }

    #[test]
    fn test_duplicate_listener_is_busy() {
        let rdv = service(RdvRole::Edge);
        rdv.add_event_listener("pipe", Some("x"), events().0).unwrap();
        assert!(matches!(
            rdv.add_event_listener("pipe", Some("x"), events().0),
            Err(RendezvousError::Busy(_))
        ));
        rdv.add_event_listener("pipe", Some("y"), events().0).unwrap();

        rdv.remove_event_listener("pipe", Some("x")).unwrap();
        assert!(rdv.remove_event_listener("pipe", Some("x")).is_err());
    }

    #[tokio::test]
    async fn test_lease_events_as_edge() {
        let rdv = service(RdvRole::Edge);
        let (listener, mut rx) = events();
        rdv.add_event_listener("test", None, listener).unwrap();

        let peer = Peer::new("urn:peer:rdv");
        assert_eq!(rdv.connect_peer(peer.clone(), None), Ok(RdvEventKind::Connected));
        assert_eq!(rdv.connect_peer(peer.clone(), None), Ok(RdvEventKind::Reconnected));
        assert!(rdv.peer_is_connected(&peer.peer_id));
        rdv.disconnect_peer(&peer.peer_id).unwrap();

        let kinds: Vec<RdvEventKind> = [
            rx.wait_for_event(Duration::from_millis(50)).await.unwrap(),
            rx.wait_for_event(Duration::from_millis(50)).await.unwrap(),
            rx.wait_for_event(Duration::from_millis(50)).await.unwrap(),
        ]
        .iter()
        .map(|e| e.kind)
        .collect();
        assert_eq!(
            kinds,
            vec![RdvEventKind::Connected, RdvEventKind::Reconnected, RdvEventKind::Disconnected]
        );
    }

    #[test]
    fn test_expired_lease_listed_until_purged() {
        let rdv = service(RdvRole::Rendezvous);
        let peer_id = PeerId::from("urn:peer:client");
        rdv.connect_peer(Peer::new(peer_id.clone()), Some(Duration::ZERO)).unwrap();

        assert!(!rdv.peer_is_connected(&peer_id));
        assert_eq!(rdv.lease_remaining(&peer_id), Some(Duration::ZERO));
        assert_eq!(rdv.get_peers().len(), 1);

        let purged = rdv.purge_expired(Instant::now());
        assert_eq!(purged, vec![peer_id]);
        assert!(rdv.get_peers().is_empty());
    }

    #[test]
    fn test_client_limit() {
        let mut config = RendezvousConfiguration::with_role(RdvRole::Rendezvous);
        config.max_clients = Some(1);
        let rdv = RendezvousService::new(PeerAdvertisement::new("urn:peer:self", "self"), config);

        rdv.connect_peer(Peer::new("urn:peer:a"), None).unwrap();
        assert_eq!(
            rdv.connect_peer(Peer::new("urn:peer:b"), None),
            Err(RendezvousError::ClientLimit(1))
        );
        assert_eq!(
            rdv.connect_peer(Peer::new("urn:peer:a"), None),
            Ok(RdvEventKind::ClientReconnected)
        );
    }

    #[tokio::test]
    async fn test_views_need_running_service() {
        let rdv = Arc::new(service(RdvRole::Rendezvous));
        assert_eq!(rdv.get_localview(), Err(RendezvousError::NotRunning));
        assert!(rdv.get_peerview().is_none());
        assert_eq!(rdv.localview_size(), 0);

        rdv.start();
        rdv.add_neighbor(Peer::new("urn:peer:n1")).unwrap();
        assert_eq!(rdv.get_localview().unwrap().len(), 1);
        assert_eq!(rdv.localview_size(), 1);
        rdv.stop();
        assert!(rdv.get_globalview().is_err());
    }

    #[tokio::test]
    async fn test_lease_loop_purges_expired_clients() {
        let mut config = RendezvousConfiguration::with_role(RdvRole::Rendezvous);
        config.lease_margin = Some(Duration::from_millis(20));
        let rdv = Arc::new(RendezvousService::new(
            PeerAdvertisement::new("urn:peer:self", "self"),
            config,
        ));
        let (listener, mut rx) = events();
        rdv.add_event_listener("test", None, listener).unwrap();
        rdv.start();

        let peer_id = PeerId::from("urn:peer:client");
        rdv.connect_peer(Peer::new(peer_id.clone()), Some(Duration::from_millis(1)))
            .unwrap();
        assert_eq!(
            rx.wait_for_event(Duration::from_millis(100)).await.unwrap().kind,
            RdvEventKind::ClientConnected
        );

        let event = rx.wait_for_event(Duration::from_millis(500)).await.unwrap();
        assert_eq!(event.kind, RdvEventKind::ClientDisconnected);
        assert_eq!(event.peer, Some(peer_id));
        assert!(rdv.get_peers().is_empty());
        rdv.stop();
    }

    #[tokio::test]
    async fn test_auto_loop_switches_to_rendezvous() {
        let mut config = RendezvousConfiguration::with_role(RdvRole::Edge);
        config.auto_rendezvous_check_interval = Some(Duration::from_millis(20));
        let rdv = Arc::new(
            RendezvousService::new(PeerAdvertisement::new("urn:peer:self", "self"), config)
                .with_fitness(Arc::new(Always(true))),
        );
        let (listener, mut rx) = events();
        rdv.add_event_listener("test", None, listener).unwrap();
        rdv.start();

        let event = rx.wait_for_event(Duration::from_secs(1)).await.unwrap();
        assert_eq!(event.kind, RdvEventKind::BecameRendezvous);
        assert_eq!(rdv.status(), RdvStatus::AutoRendezvous);
        rdv.stop();
    }

    #[tokio::test]
    async fn test_lease_failed_emits_failed() {
        let rdv = service(RdvRole::Edge);
        let peer_id = PeerId::from("urn:peer:rdv");
        rdv.connect_peer(Peer::new(peer_id.clone()), None).unwrap();
        let (listener, mut rx) = events();
        rdv.add_event_listener("test", None, listener).unwrap();

        assert!(rdv.lease_failed(&peer_id).is_some());
        assert!(rdv.lease_failed(&peer_id).is_none());
        let event = rx.wait_for_event(Duration::from_millis(100)).await.unwrap();
        assert_eq!(event.kind, RdvEventKind::Failed);
        assert!(rdv.get_peers().is_empty());
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_remove_neighbor_emits_disconnected() {
        let rdv = Arc::new(service(RdvRole::Rendezvous));
        rdv.start();
        let peer_id = PeerId::from("urn:peer:n1");
        rdv.add_neighbor(Peer::new(peer_id.clone())).unwrap();
        let (listener, mut rx) = events();
        rdv.add_event_listener("test", None, listener).unwrap();

        assert!(rdv.remove_neighbor(&peer_id).unwrap().is_some());
        assert_eq!(rdv.remove_neighbor(&peer_id), Ok(None));
        let event = rx.wait_for_event(Duration::from_millis(100)).await.unwrap();
        assert_eq!(event.kind, RdvEventKind::Disconnected);
        assert_eq!(event.peer, Some(peer_id));
        assert_eq!(rdv.localview_size(), 0);
        rdv.stop();
    }

    #[tokio::test]
    async fn test_adhoc_has_no_peerview() {
        let rdv = Arc::new(service(RdvRole::AdHoc));
        rdv.start();
        assert!(rdv.get_peerview().is_none());
        assert_eq!(rdv.get_localview(), Err(RendezvousError::NoPeerview));
        assert_eq!(rdv.localview_size(), 0);
        rdv.stop();
    }
}
