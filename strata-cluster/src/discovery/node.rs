//! Cluster member records

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::error::{Error, Result};

/// One cluster member as the client currently knows it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub address: Url,
    /// Cluster-assigned identity, unknown until the node answers a probe
    pub identifier: Option<String>,
    /// Hash of the membership view this node last reported
    pub topology_hash: Option<String>,
}

impl NodeRecord {
    /// A seed that has not been probed yet
    #[must_use]
    pub fn unresolved(address: Url) -> Self {
        Self {
            address,
            identifier: None,
            topology_hash: None,
        }
    }

    #[must_use]
    pub fn resolved(address: Url, identifier: String, topology_hash: Option<String>) -> Self {
        Self {
            address,
            identifier: Some(identifier),
            topology_hash,
        }
    }

    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.identifier.is_some()
    }

    /// Registry key: the identifier once known, the address before that
    #[must_use]
    pub fn key(&self) -> NodeKey {
        match &self.identifier {
            Some(id) => NodeKey::Identifier(id.clone()),
            None => NodeKey::Address(self.address.clone()),
        }
    }
}

impl fmt::Display for NodeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Some(id) => write!(f, "{id}@{}", self.address),
            None => write!(f, "<unresolved>@{}", self.address),
        }
    }
}

/// Identity of a registry entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    Identifier(String),
    Address(Url),
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier(id) => f.write_str(id),
            Self::Address(addr) => write!(f, "{addr}"),
        }
    }
}

/// Parse a node address, defaulting the scheme to `http`
pub fn parse_address(raw: &str) -> Result<Url> {
    strata_core::config::parse_seed(raw)
        .map_err(|e| Error::Configuration(format!("invalid node address '{raw}': {e}")))
}
