//! HTTP topology client
//!
//! Talks to a node's JSON state, topology and gossip endpoints.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::topology::{GossipEntry, GossipView, TopologyClient, TopologyMember, TopologyView};
use crate::error::{Error, Result};

const USER_AGENT: &str = concat!("strata/", env!("CARGO_PKG_VERSION"));

#[derive(Deserialize)]
struct NodeState {
    id: String,
    /// Hash of the topology the node is currently serving
    #[serde(default)]
    current: String,
}

#[derive(Deserialize)]
struct TopologyNode {
    id: String,
    address: String,
    port: u16,
    #[serde(default)]
    apiport: Option<u16>,
}

#[derive(Deserialize)]
struct GossipNode {
    id: String,
    /// Seconds since the reporter last heard from this peer
    age: f64,
}

/// `TopologyClient` backed by the nodes' HTTP endpoints
#[derive(Debug, Clone)]
pub struct HttpTopologyClient {
    client: Client,
}

impl HttpTopologyClient {
    /// Create a client whose every request is bounded by `request_timeout`
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(request_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Wrap an already configured reqwest client
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn get_json<T: DeserializeOwned>(&self, node: &Url, segments: &[&str]) -> Result<T> {
        let url = endpoint(node, segments)?;

        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify(node, &e))?
            .error_for_status()
            .map_err(|e| classify(node, &e))?;

        resp.json::<T>().await.map_err(|e| classify(node, &e))
    }

    async fn topology(&self, node: &Url, hash: &str) -> Result<Vec<TopologyMember>> {
        let nodes: Vec<TopologyNode> = self.get_json(node, &["topology", "json", hash]).await?;

        nodes
            .into_iter()
            .map(|n| {
                let port = n.apiport.unwrap_or(n.port);
                let address = member_url(node.scheme(), &n.address, port).map_err(|e| {
                    Error::protocol(node, format!("member {} has bad address '{}': {e}", n.id, n.address))
                })?;
                Ok(TopologyMember {
                    identifier: n.id,
                    address,
                })
            })
            .collect()
    }
}

#[async_trait]
impl TopologyClient for HttpTopologyClient {
    async fn probe(&self, address: &Url) -> Result<TopologyView> {
        let state: NodeState = self.get_json(address, &["state"]).await?;
        if state.id.is_empty() {
            return Err(Error::protocol(address, "node state has an empty id"));
        }

        // A node that has not loaded a topology yet reports an empty or all-zero hash
        let members = if has_topology(&state.current) {
            self.topology(address, &state.current).await?
        } else {
            tracing::debug!(address = %address, node_id = %state.id, "Node has no topology loaded");
            Vec::new()
        };

        Ok(TopologyView {
            identifier: state.id,
            topology_hash: state.current,
            members,
        })
    }

    async fn gossip(&self, address: &Url) -> Result<GossipView> {
        let state: NodeState = self.get_json(address, &["state"]).await?;
        let nodes: Vec<GossipNode> = self.get_json(address, &["gossip", "json"]).await?;

        let entries = nodes
            .into_iter()
            .map(|n| {
                let last_seen_age = Duration::try_from_secs_f64(n.age).map_err(|e| {
                    Error::protocol(address, format!("peer {} has bad gossip age {}: {e}", n.id, n.age))
                })?;
                Ok(GossipEntry {
                    identifier: n.id,
                    last_seen_age,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(GossipView {
            reporter: state.id,
            entries,
        })
    }
}

fn has_topology(hash: &str) -> bool {
    !hash.is_empty() && hash.chars().any(|c| c != '0')
}

/// Append path segments to a node address, keeping any base path
fn endpoint(node: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = node.clone();
    url.path_segments_mut()
        .map_err(|()| Error::Configuration(format!("{node} cannot be used as a base address")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn member_url(scheme: &str, host: &str, port: u16) -> std::result::Result<Url, url::ParseError> {
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    };
    Url::parse(&format!("{scheme}://{host}:{port}"))
}

/// Connection trouble means the node is down; anything after a response
/// arrived is a protocol problem.
fn classify(node: &Url, err: &reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::timed_out(node, err)
    } else if err.is_status() || err.is_decode() || err.is_body() {
        Error::protocol(node, err)
    } else {
        Error::unreachable(node, err)
    }
}
