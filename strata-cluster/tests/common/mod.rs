//! In-memory cluster used by the integration tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use strata_cluster::discovery::{GossipEntry, GossipView, TopologyMember};
use strata_cluster::{Error, Result, TopologyClient, TopologyView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Health {
    Up,
    /// Refuses connections
    Down,
    /// Alive for its peers, but probes from the client time out
    Stalled,
}

#[derive(Debug, Clone)]
struct FakeNode {
    identifier: String,
    health: Health,
    members: Vec<TopologyMember>,
}

/// Scriptable cluster: nodes can be added, taken down, stalled and brought back
#[derive(Debug, Default)]
pub struct FakeCluster {
    nodes: Mutex<HashMap<Url, FakeNode>>,
}

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a node answering at `address` that reports `members`
    pub fn node(&self, address: &str, identifier: &str, members: &[(&str, &str)]) {
        let members = members
            .iter()
            .map(|(id, addr)| TopologyMember {
                identifier: (*id).to_string(),
                address: url(addr),
            })
            .collect();
        self.nodes.lock().insert(
            url(address),
            FakeNode {
                identifier: identifier.to_string(),
                health: Health::Up,
                members,
            },
        );
    }

    pub fn set_up(&self, address: &str, up: bool) {
        self.set_health(address, if up { Health::Up } else { Health::Down });
    }

    pub fn stall(&self, address: &str) {
        self.set_health(address, Health::Stalled);
    }

    fn set_health(&self, address: &str, health: Health) {
        if let Some(node) = self.nodes.lock().get_mut(&url(address)) {
            node.health = health;
        }
    }

    fn answering(&self, address: &Url) -> Result<FakeNode> {
        match self.nodes.lock().get(address) {
            Some(node) if node.health == Health::Up => Ok(node.clone()),
            Some(node) if node.health == Health::Stalled => Err(Error::Unreachable {
                address: address.to_string(),
                reason: "deadline elapsed".to_string(),
                timed_out: true,
            }),
            _ => Err(Error::Unreachable {
                address: address.to_string(),
                reason: "connection refused".to_string(),
                timed_out: false,
            }),
        }
    }
}

#[async_trait]
impl TopologyClient for FakeCluster {
    async fn probe(&self, address: &Url) -> Result<TopologyView> {
        let node = self.answering(address)?;
        Ok(TopologyView {
            identifier: node.identifier,
            topology_hash: "h1".to_string(),
            members: node.members,
        })
    }

    async fn gossip(&self, address: &Url) -> Result<GossipView> {
        let node = self.answering(address)?;
        let nodes = self.nodes.lock();
        let entries = nodes
            .values()
            .map(|peer| GossipEntry {
                identifier: peer.identifier.clone(),
                last_seen_age: if peer.health == Health::Down {
                    Duration::from_secs(3600)
                } else {
                    Duration::from_secs(1)
                },
            })
            .collect();
        Ok(GossipView {
            reporter: node.identifier,
            entries,
        })
    }
}
