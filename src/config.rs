// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! Configuration management for mesh peers
//!
//! Supports both command-line arguments and TOML configuration files.
//! The `[rendezvous]` section keeps the camelCase names of the rendezvous
//! configuration advertisement; durations are milliseconds and `-1` means
//! disabled or unlimited.

use crate::error::MeshError;
use crate::id::{EndpointAddress, PeerId};
use crate::message::PIPE_RESOLVER_NAME;
use crate::pipe_resolver::{DEFAULT_MAX_FORWARD_HOPS, ResolverConfig};
use crate::rendezvous::{DEFAULT_AUTO_RDV_INTERVAL, RdvRole, RendezvousConfiguration};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::time::Duration;

/// Command-line arguments for the demo peer
#[derive(Parser, Debug)]
#[command(name = "pipemesh")]
#[command(author = "PipeMesh Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Pipe resolution over a rendezvous overlay", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Peer name
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,

    /// Rendezvous role: adhoc, client, or rendezvous
    #[arg(long, value_name = "ROLE")]
    pub role: Option<RdvRole>,

    /// Number of peers in the loopback overlay
    #[arg(long, value_name = "N", default_value = "3")]
    pub peers: usize,

    /// Resolution timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,
}

/// TOML configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub peer: PeerConfig,
    #[serde(default)]
    pub rendezvous: RdvConfig,
    #[serde(default)]
    pub resolver: ResolverToml,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Peer section of config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerConfig {
    #[serde(default = "default_peer_name")]
    pub name: String,
    /// Derived from the name when absent
    #[serde(default)]
    pub peer_id: Option<String>,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default)]
    pub endpoints: Vec<EndpointAddress>,
}

fn default_peer_name() -> String {
    "pipemesh-peer".to_string()
}

fn default_group() -> String {
    "NetPeerGroup".to_string()
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            name: default_peer_name(),
            peer_id: None,
            group: default_group(),
            endpoints: Vec::new(),
        }
    }
}

impl PeerConfig {
    pub fn peer_id(&self) -> PeerId {
        match &self.peer_id {
            Some(id) => PeerId::new(id.clone()),
            None => PeerId::new(format!("urn:jxta:{}", self.name)),
        }
    }
}

/// Rendezvous section of config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RdvConfig {
    /// adhoc, client or rendezvous
    #[serde(default = "default_rdv_config")]
    pub config: String,
    #[serde(rename = "maxTTL", default = "default_max_ttl")]
    pub max_ttl: i64,
    /// Check interval in ms; 0 selects the default, -1 disables
    #[serde(default = "default_disabled")]
    pub auto_rendezvous_interval: i64,
    #[serde(default = "default_true")]
    pub probe_relays: bool,
    #[serde(default = "default_disabled")]
    pub max_clients: i64,
    #[serde(default = "default_lease_duration")]
    pub lease_duration: i64,
    #[serde(default = "default_lease_margin")]
    pub lease_margin: i64,
    #[serde(rename = "minHappyPeerView", default = "default_min_happy_peerview")]
    pub min_happy_peerview: i64,
    #[serde(default)]
    pub seeds: Vec<EndpointAddress>,
    #[serde(default)]
    pub seeding: Vec<EndpointAddress>,
    #[serde(default)]
    pub use_only_seeds: bool,
    #[serde(default)]
    pub connect_delay: i64,
}

fn default_rdv_config() -> String {
    "client".to_string()
}

fn default_max_ttl() -> i64 {
    DEFAULT_MAX_FORWARD_HOPS as i64
}

fn default_disabled() -> i64 {
    -1
}

fn default_true() -> bool {
    true
}

fn default_lease_duration() -> i64 {
    20 * 60 * 1000 // 20 minutes
}

fn default_lease_margin() -> i64 {
    5000
}

fn default_min_happy_peerview() -> i64 {
    4
}

impl Default for RdvConfig {
    fn default() -> Self {
        Self {
            config: default_rdv_config(),
            max_ttl: default_max_ttl(),
            auto_rendezvous_interval: default_disabled(),
            probe_relays: true,
            max_clients: default_disabled(),
            lease_duration: default_lease_duration(),
            lease_margin: default_lease_margin(),
            min_happy_peerview: default_min_happy_peerview(),
            seeds: Vec::new(),
            seeding: Vec::new(),
            use_only_seeds: false,
            connect_delay: 0,
        }
    }
}

fn millis(value: i64) -> Option<Duration> {
    u64::try_from(value).ok().map(Duration::from_millis)
}

impl RdvConfig {
    /// Typed configuration; negative values become `None`
    pub fn to_rendezvous_configuration(&self) -> RendezvousConfiguration {
        let auto_rendezvous_check_interval = match self.auto_rendezvous_interval {
            0 => Some(DEFAULT_AUTO_RDV_INTERVAL),
            ms => millis(ms),
        };

        RendezvousConfiguration {
            role: RdvRole::from_config_str(&self.config),
            auto_rendezvous_check_interval,
            lease_duration: millis(self.lease_duration),
            lease_margin: millis(self.lease_margin),
            max_clients: u32::try_from(self.max_clients).ok(),
            max_ttl: u32::try_from(self.max_ttl).ok(),
            probe_relays: self.probe_relays,
            min_happy_peerview: usize::try_from(self.min_happy_peerview).ok(),
            seeds: self.seeds.clone(),
            seeding: self.seeding.clone(),
            use_only_seeds: self.use_only_seeds,
            connect_delay: millis(self.connect_delay),
        }
    }
}

/// Resolver section of config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverToml {
    #[serde(default = "default_handler_name")]
    pub handler_name: String,
    /// Capacity of the pending-request table
    #[serde(default = "default_max_pending_requests")]
    pub max_pending_requests: usize,
    #[serde(default = "default_listener_queue_size")]
    pub listener_queue_size: usize,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Lifetime of peer advertisements learned from resolver traffic
    #[serde(default = "default_adv_lifetime_ms")]
    pub adv_lifetime_ms: u64,
}

fn default_handler_name() -> String {
    PIPE_RESOLVER_NAME.to_string()
}

fn default_max_pending_requests() -> usize {
    1024
}

fn default_listener_queue_size() -> usize {
    64
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_adv_lifetime_ms() -> u64 {
    2 * 60 * 60 * 1000 // 2 hours
}

impl Default for ResolverToml {
    fn default() -> Self {
        Self {
            handler_name: default_handler_name(),
            max_pending_requests: default_max_pending_requests(),
            listener_queue_size: default_listener_queue_size(),
            default_timeout_ms: default_timeout_ms(),
            adv_lifetime_ms: default_adv_lifetime_ms(),
        }
    }
}

impl ResolverToml {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn adv_lifetime(&self) -> Duration {
        Duration::from_millis(self.adv_lifetime_ms)
    }
}

/// Logging section of config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

impl NodeConfig {
    /// Builds the configuration from a file, if given, then applies CLI overrides
    pub fn from_cli(args: &CliArgs) -> Result<Self, MeshError> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(name) = &args.name {
            config.peer.name = name.clone();
        }
        if let Some(role) = args.role {
            config.rendezvous.config = role.to_string();
        }
        if let Some(timeout_ms) = args.timeout_ms {
            config.resolver.default_timeout_ms = timeout_ms;
        }
        Ok(config)
    }

    /// Loads configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, MeshError> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, MeshError> {
        toml::from_str(contents)
            .map_err(|e| MeshError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Writes configuration as TOML
    pub fn save(&self, path: &Path) -> Result<(), MeshError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| MeshError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Resolver tunables, with the forward hop limit taken from `maxTTL`
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            handler_name: self.resolver.handler_name.clone(),
            max_pending_requests: self.resolver.max_pending_requests,
            listener_queue_size: self.resolver.listener_queue_size,
            max_forward_hops: u32::try_from(self.rendezvous.max_ttl).unwrap_or(DEFAULT_MAX_FORWARD_HOPS),
        }
    }
}
