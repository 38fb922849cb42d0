// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present PipeMesh Contributors

//! Identifiers
//!
//! Peer and pipe identifiers are opaque URN-like strings. Endpoint
//! addresses follow the `protocol://address` form used for seeds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a peer in the overlay
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a logical pipe
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipeId(String);

impl PipeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PipeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PipeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A transport endpoint such as `tcp://10.0.0.1:9701`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndpointAddress {
    /// Transport protocol name
    pub protocol: String,
    /// Protocol specific address
    pub address: String,
}

impl EndpointAddress {
    pub fn new(protocol: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.address)
    }
}

impl std::str::FromStr for EndpointAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once("://") {
            Some((protocol, address)) if !protocol.is_empty() && !address.is_empty() => {
                Ok(Self::new(protocol, address))
            }
            _ => Err(format!(
                "Invalid endpoint address: {}. Use 'protocol://address'",
                s
            )),
        }
    }
}

impl TryFrom<String> for EndpointAddress {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EndpointAddress> for String {
    fn from(addr: EndpointAddress) -> Self {
        addr.to_string()
    }
}
