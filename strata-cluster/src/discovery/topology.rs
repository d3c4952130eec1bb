//! Topology and gossip views reported by individual nodes

use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use crate::error::Result;

/// One member as listed in a node's topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyMember {
    pub identifier: String,
    pub address: Url,
}

/// What a single node reported about itself and the cluster
///
/// Only lives for the duration of a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyView {
    /// Identifier of the node that answered
    pub identifier: String,
    /// Hash of the membership view the node is currently using
    pub topology_hash: String,
    pub members: Vec<TopologyMember>,
}

impl TopologyView {
    #[must_use]
    pub fn contains(&self, identifier: &str) -> bool {
        self.members.iter().any(|m| m.identifier == identifier)
    }
}

/// Peer liveness as seen by one node
#[derive(Debug, Clone, PartialEq)]
pub struct GossipEntry {
    pub identifier: String,
    /// Time since the reporter last heard from this peer
    pub last_seen_age: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GossipView {
    pub reporter: String,
    pub entries: Vec<GossipEntry>,
}

impl GossipView {
    /// How long ago the reporter last heard from `identifier`
    #[must_use]
    pub fn age_of(&self, identifier: &str) -> Option<Duration> {
        self.entries
            .iter()
            .find(|e| e.identifier == identifier)
            .map(|e| e.last_seen_age)
    }
}

/// Liveness and membership queries against a single node
///
/// Failures are `Error::Unreachable` (connect failure, timeout) or
/// `Error::Protocol` (answered with something unusable).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TopologyClient: Send + Sync {
    /// Ask a node who it is and which members it knows about
    async fn probe(&self, address: &Url) -> Result<TopologyView>;

    /// Ask a node how recently it heard from each of its peers
    async fn gossip(&self, address: &Url) -> Result<GossipView>;
}
