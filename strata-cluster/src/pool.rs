//! Client-facing node pool
//!
//! Owns the registry, discovery and health watch for one cluster and exposes
//! what request dispatch needs: the active list, failure reporting and
//! lifecycle control for the background watch.

use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::discovery::{
    parse_address, Discovery, HealthWatch, HttpTopologyClient, NodeRecord, NodeRegistry,
    NodeSelector, RefreshReport, TopologyClient,
};
use crate::error::{Error, Result};
use strata_core::ClusterConfig;

pub struct NodePool {
    registry: Arc<NodeRegistry>,
    discovery: Arc<Discovery>,
    watch: HealthWatch,
    selector: NodeSelector,
}

impl NodePool {
    /// Bootstrap a pool over HTTP from the configured seeds
    ///
    /// Fails with `NoReachableSeeds` when no seed answers.
    pub async fn connect(config: &ClusterConfig) -> Result<Self> {
        let client = HttpTopologyClient::new(config.request_timeout())?;
        Self::with_client(config, Arc::new(client)).await
    }

    /// Bootstrap a pool using a custom topology client
    pub async fn with_client(
        config: &ClusterConfig,
        client: Arc<dyn TopologyClient>,
    ) -> Result<Self> {
        if config.watch_interval().is_zero() {
            return Err(Error::Configuration(
                "watch_interval_ms must be greater than zero".to_string(),
            ));
        }
        if config.request_timeout().is_zero() {
            return Err(Error::Configuration(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }

        let seeds = config
            .seeds
            .iter()
            .map(|seed| parse_address(seed))
            .collect::<Result<Vec<_>>>()?;

        let registry = Arc::new(NodeRegistry::new());
        let discovery = Arc::new(
            Discovery::new(registry.clone(), client, config.request_timeout())
                .with_topology_merge(config.discover),
        );

        discovery.bootstrap(&seeds).await?;
        if config.discover {
            discovery.refresh().await?;
        }

        let watch = HealthWatch::new(discovery.clone(), config.watch_interval())
            .with_gossip_max_age(config.gossip_max_age());

        let (active, inactive) = registry.partition();
        tracing::info!(
            active = active.len(),
            inactive = inactive.len(),
            "Node pool ready"
        );

        Ok(Self {
            registry,
            discovery,
            watch,
            selector: NodeSelector::new(config.selection),
        })
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Snapshot of the nodes currently believed usable
    ///
    /// Empty during a total outage; whether that is fatal is up to the caller.
    #[must_use]
    pub fn list_active(&self) -> Vec<NodeRecord> {
        self.registry.list_active()
    }

    #[must_use]
    pub fn list_inactive(&self) -> Vec<NodeRecord> {
        self.registry.list_inactive()
    }

    pub fn activate(&self, nodes: &[NodeRecord]) -> Result<usize> {
        self.registry.activate(nodes)
    }

    pub fn deactivate(&self, nodes: &[NodeRecord]) -> Result<usize> {
        self.registry.deactivate(nodes)
    }

    /// Take a node out of rotation after a failed data call, without waiting
    /// for the next watch pass
    pub fn report_failure(&self, node: &NodeRecord, error: &Error) -> Result<()> {
        tracing::warn!(node = %node, error = %error, "Request to node failed, deactivating");
        self.registry.deactivate([node]).map(|_| ())
    }

    /// Run discovery now instead of waiting for the watch
    pub async fn discover(&self) -> Result<RefreshReport> {
        self.discovery.refresh().await
    }

    /// Start the background health watch
    ///
    /// Cancel the token and await the handle to stop it. Cancel a previous
    /// watch before starting another; overlapping loops are not prevented.
    pub fn start_watch(&self, cancel_token: CancellationToken) -> JoinHandle<()> {
        self.watch.start(cancel_token)
    }

    #[must_use]
    pub const fn watch(&self) -> &HealthWatch {
        &self.watch
    }

    /// Pick one active node using the configured strategy
    #[must_use]
    pub fn active_node(&self) -> Option<NodeRecord> {
        self.selector.select(&self.registry.list_active())
    }

    /// Run `op` against active nodes until one succeeds
    ///
    /// Nodes are tried in selection order. A node whose call fails with a
    /// node-level error (`Unreachable`/`Protocol`) is deactivated and the next
    /// one is tried; any other error is returned immediately.
    pub async fn with_active_node<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(NodeRecord) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let candidates = self.selector.order(self.registry.list_active());
        let mut last_error = None;

        for node in candidates {
            match op(node.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_node_failure() => {
                    self.report_failure(&node, &e)?;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(Error::NoActiveNodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::topology::{MockTopologyClient, TopologyMember, TopologyView};
    use strata_core::SelectionStrategy;
    use url::Url;

    fn config(seeds: &[&str]) -> ClusterConfig {
        ClusterConfig {
            seeds: seeds.iter().map(|s| (*s).to_string()).collect(),
            selection: SelectionStrategy::First,
            ..ClusterConfig::default()
        }
    }

    fn two_node_client() -> MockTopologyClient {
        let mut client = MockTopologyClient::new();
        client.expect_probe().returning(|address| {
            let id = if address.port() == Some(8112) { "a" } else { "b" };
            Ok(TopologyView {
                identifier: id.to_string(),
                topology_hash: "h1".to_string(),
                members: vec![
                    TopologyMember {
                        identifier: "a".to_string(),
                        address: Url::parse("http://127.0.0.1:8112").unwrap(),
                    },
                    TopologyMember {
                        identifier: "b".to_string(),
                        address: Url::parse("http://127.0.0.1:8113").unwrap(),
                    },
                ],
            })
        });
        client
    }

    #[tokio::test]
    async fn test_connect_discovers_members() {
        let pool = NodePool::with_client(&config(&["127.0.0.1:8112"]), Arc::new(two_node_client()))
            .await
            .unwrap();

        assert_eq!(pool.list_active().len(), 2);
        assert!(pool.list_inactive().is_empty());
        assert_eq!(pool.active_node().unwrap().identifier.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_connect_without_discovery_keeps_seeds_only() {
        let mut config = config(&["127.0.0.1:8112"]);
        config.discover = false;
        let pool = NodePool::with_client(&config, Arc::new(two_node_client())).await.unwrap();

        assert_eq!(pool.list_active().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_seed() {
        let result = NodePool::with_client(&config(&["http://"]), Arc::new(MockTopologyClient::new())).await;
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_connect_rejects_zero_timings() {
        let mut zero_interval = config(&["127.0.0.1:8112"]);
        zero_interval.watch_interval_ms = 0;
        let result = NodePool::with_client(&zero_interval, Arc::new(MockTopologyClient::new())).await;
        assert!(matches!(result, Err(Error::Configuration(ref msg)) if msg.contains("watch_interval_ms")));

        let mut zero_timeout = config(&["127.0.0.1:8112"]);
        zero_timeout.request_timeout_ms = 0;
        let result = NodePool::with_client(&zero_timeout, Arc::new(MockTopologyClient::new())).await;
        assert!(matches!(result, Err(Error::Configuration(ref msg)) if msg.contains("request_timeout_ms")));
    }

    #[tokio::test]
    async fn test_with_active_node_fails_over() {
        let pool = NodePool::with_client(&config(&["127.0.0.1:8112"]), Arc::new(two_node_client()))
            .await
            .unwrap();

        let served_by = pool
            .with_active_node(|node| async move {
                if node.identifier.as_deref() == Some("a") {
                    Err(Error::unreachable(&node.address, "connection reset"))
                } else {
                    Ok(node.identifier.unwrap_or_default())
                }
            })
            .await
            .unwrap();

        assert_eq!(served_by, "b");
        let inactive = pool.list_inactive();
        assert_eq!(inactive.len(), 1);
        assert_eq!(inactive[0].identifier.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_with_active_node_on_empty_pool() {
        let pool = NodePool::with_client(&config(&["127.0.0.1:8112"]), Arc::new(two_node_client()))
            .await
            .unwrap();
        pool.deactivate(&pool.list_active()).unwrap();

        let result: Result<()> = pool.with_active_node(|_| async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::NoActiveNodes)));
    }

    #[tokio::test]
    async fn test_with_active_node_returns_other_errors() {
        let pool = NodePool::with_client(&config(&["127.0.0.1:8112"]), Arc::new(two_node_client()))
            .await
            .unwrap();

        let result: Result<()> = pool
            .with_active_node(|_| async { Err(Error::Configuration("bad request".to_string())) })
            .await;
        assert!(matches!(result, Err(Error::Configuration(_))));
        assert_eq!(pool.list_active().len(), 2);
    }
}
