//! Seed bootstrap and topology-driven member discovery

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::node::NodeRecord;
use super::node_registry::{MergeOutcome, NodeRegistry};
use super::topology::{GossipView, TopologyClient, TopologyView};
use crate::error::{Error, Result};

/// Outcome of walking the active set once
#[derive(Debug, Default)]
pub struct RefreshReport {
    /// Active nodes that answered, as they were before the merge
    pub reached: Vec<NodeRecord>,
    /// Active nodes that did not answer, with the reason
    pub failed: Vec<(NodeRecord, Error)>,
    /// Every identifier listed by any fetched topology
    pub seen: HashSet<String>,
    /// True when at least one fetched topology listed members
    pub saw_topology: bool,
    pub added: usize,
    pub relocated: usize,
}

/// Outcome of probing a set of (inactive) nodes
#[derive(Debug, Default)]
pub struct ProbeReport {
    pub recovered: Vec<NodeRecord>,
    pub failed: Vec<(NodeRecord, Error)>,
}

/// Populates a `NodeRegistry` from seeds and the cluster's own topology
pub struct Discovery {
    registry: Arc<NodeRegistry>,
    client: Arc<dyn TopologyClient>,
    probe_timeout: Duration,
    merge_topology: bool,
}

impl Discovery {
    #[must_use]
    pub fn new(
        registry: Arc<NodeRegistry>,
        client: Arc<dyn TopologyClient>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            client,
            probe_timeout,
            merge_topology: true,
        }
    }

    /// Turn topology merging on or off. When off, only the liveness of
    /// already known nodes is tracked.
    #[must_use]
    pub const fn with_topology_merge(mut self, enabled: bool) -> Self {
        self.merge_topology = enabled;
        self
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn merges_topology(&self) -> bool {
        self.merge_topology
    }

    /// Probe one node, bounded by the per-call timeout
    pub async fn probe(&self, address: &Url) -> Result<TopologyView> {
        tokio::time::timeout(self.probe_timeout, self.client.probe(address))
            .await
            .map_err(|_| {
                Error::timed_out(address, format!("no answer within {:?}", self.probe_timeout))
            })?
    }

    /// Fetch one node's gossip, bounded by the per-call timeout
    pub async fn gossip(&self, address: &Url) -> Result<GossipView> {
        tokio::time::timeout(self.probe_timeout, self.client.gossip(address))
            .await
            .map_err(|_| {
                Error::timed_out(address, format!("no answer within {:?}", self.probe_timeout))
            })?
    }

    /// Register the seeds and promote every one that answers
    ///
    /// Returns the number of seeds that answered. Fails with
    /// `NoReachableSeeds` only when none did.
    pub async fn bootstrap(&self, seeds: &[Url]) -> Result<usize> {
        if seeds.is_empty() {
            return Err(Error::Configuration("no seed nodes configured".to_string()));
        }

        let records: Vec<NodeRecord> = seeds.iter().cloned().map(NodeRecord::unresolved).collect();
        self.registry.add(records.iter().cloned());

        let report = self.probe_nodes(&records).await?;
        if report.recovered.is_empty() {
            tracing::error!(attempted = seeds.len(), "No seed node answered");
            return Err(Error::NoReachableSeeds {
                attempted: seeds.len(),
            });
        }

        tracing::info!(
            reachable = report.recovered.len(),
            attempted = seeds.len(),
            "Seed nodes probed"
        );
        Ok(report.recovered.len())
    }

    /// Probe `records` concurrently; resolve and activate the ones that answer
    ///
    /// Nodes that fail are left where they are. A resolved node found to
    /// answer with a different identifier keeps its old status and the new
    /// identity is merged as a member.
    pub async fn probe_nodes(&self, records: &[NodeRecord]) -> Result<ProbeReport> {
        let results = join_all(records.iter().map(|r| self.probe(&r.address))).await;

        let mut report = ProbeReport::default();
        for (record, result) in records.iter().zip(results) {
            let view = match result {
                Ok(view) => view,
                Err(e) => {
                    log_probe_failure(record, &e);
                    report.failed.push((record.clone(), e));
                    continue;
                }
            };

            let current = match &record.identifier {
                None => match self.registry.resolve(
                    &record.address,
                    &view.identifier,
                    Some(&view.topology_hash),
                ) {
                    Ok(resolution) => resolution.record().clone(),
                    Err(_) => {
                        // a discovered member replaced the placeholder meanwhile
                        self.registry.merge_member(
                            &view.identifier,
                            &record.address,
                            Some(&view.topology_hash),
                        );
                        let Some(current) = self.registry.get(&view.identifier) else {
                            continue;
                        };
                        current
                    }
                },
                Some(id) if *id == view.identifier => {
                    self.registry.update_topology_hash(id, &view.topology_hash);
                    record.clone()
                }
                Some(id) => {
                    tracing::warn!(
                        address = %record.address,
                        expected = %id,
                        actual = %view.identifier,
                        "A different node now answers at this address"
                    );
                    self.registry.merge_member(
                        &view.identifier,
                        &record.address,
                        Some(&view.topology_hash),
                    );
                    continue;
                }
            };

            self.registry.activate([&current])?;
            report.recovered.push(current);
        }

        Ok(report)
    }

    /// Walk the active set: fetch each node's topology and merge its members
    ///
    /// Members are applied in the order each topology lists them, and
    /// topologies in active-list order, so when two nodes disagree about an
    /// address the later one wins. Nothing is deactivated here.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let active = self.registry.list_active();
        let results = join_all(active.iter().map(|r| self.probe(&r.address))).await;

        let mut report = RefreshReport::default();
        for (record, result) in active.into_iter().zip(results) {
            let view = match result {
                Ok(view) => view,
                Err(e) => {
                    log_probe_failure(&record, &e);
                    report.failed.push((record, e));
                    continue;
                }
            };

            let impostor = match &record.identifier {
                Some(id) if *id == view.identifier => {
                    self.registry.update_topology_hash(id, &view.topology_hash);
                    false
                }
                Some(id) => {
                    tracing::warn!(
                        address = %record.address,
                        expected = %id,
                        actual = %view.identifier,
                        "A different node now answers at this address"
                    );
                    true
                }
                None => false,
            };

            if self.merge_topology {
                self.merge_view(&view, &mut report);
            }

            if impostor {
                let reason = format!("answered as {}", view.identifier);
                let error = Error::protocol(&record.address, reason);
                report.failed.push((record, error));
            } else {
                report.reached.push(record);
            }
        }

        tracing::debug!(
            reached = report.reached.len(),
            failed = report.failed.len(),
            added = report.added,
            relocated = report.relocated,
            "Topology refresh finished"
        );
        Ok(report)
    }

    fn merge_view(&self, view: &TopologyView, report: &mut RefreshReport) {
        if !view.members.is_empty() {
            report.saw_topology = true;
        }
        for member in &view.members {
            report.seen.insert(member.identifier.clone());
            match self.registry.merge_member(
                &member.identifier,
                &member.address,
                Some(&view.topology_hash),
            ) {
                MergeOutcome::Added => report.added += 1,
                MergeOutcome::Relocated => report.relocated += 1,
                MergeOutcome::Unchanged => {}
            }
        }
    }
}

fn log_probe_failure(record: &NodeRecord, error: &Error) {
    match error {
        Error::Protocol { reason, .. } => tracing::warn!(
            node = %record,
            reason = %reason,
            "Node answered with an unusable response, possible version mismatch"
        ),
        _ => tracing::warn!(node = %record, error = %error, "Node probe failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::topology::{MockTopologyClient, TopologyMember};
    use mockall::predicate::eq;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn view(id: &str, hash: &str, members: &[(&str, &str)]) -> TopologyView {
        TopologyView {
            identifier: id.to_string(),
            topology_hash: hash.to_string(),
            members: members
                .iter()
                .map(|(id, addr)| TopologyMember {
                    identifier: (*id).to_string(),
                    address: url(addr),
                })
                .collect(),
        }
    }

    fn discovery(client: MockTopologyClient) -> Discovery {
        Discovery::new(
            Arc::new(NodeRegistry::new()),
            Arc::new(client),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn test_bootstrap_resolves_reachable_seeds() {
        let mut client = MockTopologyClient::new();
        client
            .expect_probe()
            .with(eq(url("http://10.0.0.1:8112")))
            .returning(|_| Ok(view("a", "h1", &[("a", "http://10.0.0.1:8112")])));
        client
            .expect_probe()
            .with(eq(url("http://10.0.0.2:8112")))
            .returning(|a| Err(Error::unreachable(a, "connection refused")));

        let discovery = discovery(client);
        let reached = discovery
            .bootstrap(&[url("http://10.0.0.1:8112"), url("http://10.0.0.2:8112")])
            .await
            .unwrap();
        assert_eq!(reached, 1);

        let registry = discovery.registry();
        let active = registry.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].identifier.as_deref(), Some("a"));
        assert_eq!(active[0].topology_hash.as_deref(), Some("h1"));

        let inactive = registry.list_inactive();
        assert_eq!(inactive.len(), 1);
        assert!(!inactive[0].is_resolved());
    }

    #[tokio::test]
    async fn test_bootstrap_fails_when_no_seed_answers() {
        let mut client = MockTopologyClient::new();
        client
            .expect_probe()
            .returning(|a| Err(Error::unreachable(a, "connection refused")));

        let discovery = discovery(client);
        let err = discovery
            .bootstrap(&[url("http://10.0.0.1:8112"), url("http://10.0.0.2:8112")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoReachableSeeds { attempted: 2 }));
        // seeds stay registered for later retries
        assert_eq!(discovery.registry().list_inactive().len(), 2);
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_empty_seed_list() {
        let discovery = discovery(MockTopologyClient::new());
        let err = discovery.bootstrap(&[]).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn test_two_seeds_for_the_same_node() {
        let mut client = MockTopologyClient::new();
        client
            .expect_probe()
            .returning(|_| Ok(view("a", "h1", &[("a", "http://10.0.0.1:8112")])));

        let discovery = discovery(client);
        discovery
            .bootstrap(&[url("http://10.0.0.1:8112"), url("http://db-a:8112")])
            .await
            .unwrap();

        let registry = discovery.registry();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.active_count(), 1);
        registry.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn test_refresh_adds_and_relocates_members() {
        let mut client = MockTopologyClient::new();
        client.expect_probe().returning(|_| {
            Ok(view(
                "a",
                "h2",
                &[
                    ("a", "http://10.0.0.1:8112"),
                    ("b", "http://10.0.0.20:8112"),
                    ("c", "http://10.0.0.3:8112"),
                ],
            ))
        });

        let discovery = discovery(client);
        let registry = discovery.registry();
        let a = NodeRecord::resolved(url("http://10.0.0.1:8112"), "a".to_string(), None);
        let b = NodeRecord::resolved(url("http://10.0.0.2:8112"), "b".to_string(), None);
        registry.add([a.clone(), b.clone()]);
        registry.activate([&a]).unwrap();

        let report = discovery.refresh().await.unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.relocated, 1);
        assert!(report.saw_topology);
        assert_eq!(report.seen.len(), 3);

        let moved = registry.get("b").unwrap();
        assert_eq!(moved.address, url("http://10.0.0.20:8112"));
        assert_eq!(registry.is_active(&b.key()), Some(false));
        assert_eq!(registry.active_count(), 2);
        assert_eq!(registry.get("a").unwrap().topology_hash.as_deref(), Some("h2"));
    }

    #[tokio::test]
    async fn test_refresh_without_merge_only_probes() {
        let mut client = MockTopologyClient::new();
        client.expect_probe().returning(|_| {
            Ok(view("a", "h1", &[("a", "http://10.0.0.1:8112"), ("c", "http://10.0.0.3:8112")]))
        });

        let discovery = discovery(client).with_topology_merge(false);
        let a = NodeRecord::resolved(url("http://10.0.0.1:8112"), "a".to_string(), None);
        discovery.registry().add([a.clone()]);
        discovery.registry().activate([&a]).unwrap();

        let report = discovery.refresh().await.unwrap();
        assert_eq!(report.reached.len(), 1);
        assert_eq!(report.added, 0);
        assert_eq!(discovery.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_later_report_wins_address_conflicts() {
        let mut client = MockTopologyClient::new();
        client
            .expect_probe()
            .with(eq(url("http://10.0.0.1:8112")))
            .returning(|_| Ok(view("a", "h1", &[("a", "http://10.0.0.1:8112"), ("c", "http://10.0.0.3:8112")])));
        client
            .expect_probe()
            .with(eq(url("http://10.0.0.2:8112")))
            .returning(|_| Ok(view("b", "h2", &[("b", "http://10.0.0.2:8112"), ("c", "http://10.0.0.33:8112")])));

        let discovery = discovery(client);
        let a = NodeRecord::resolved(url("http://10.0.0.1:8112"), "a".to_string(), None);
        let b = NodeRecord::resolved(url("http://10.0.0.2:8112"), "b".to_string(), None);
        discovery.registry().add([a.clone(), b.clone()]);
        discovery.registry().activate([&a, &b]).unwrap();

        discovery.refresh().await.unwrap();
        let c = discovery.registry().get("c").unwrap();
        assert_eq!(c.address, url("http://10.0.0.33:8112"));
        assert_eq!(c.topology_hash.as_deref(), Some("h2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_is_bounded_by_timeout() {
        struct Hung;

        #[async_trait::async_trait]
        impl TopologyClient for Hung {
            async fn probe(&self, _: &Url) -> Result<TopologyView> {
                futures::future::pending().await
            }
            async fn gossip(&self, _: &Url) -> Result<GossipView> {
                futures::future::pending().await
            }
        }

        let discovery = Discovery::new(
            Arc::new(NodeRegistry::new()),
            Arc::new(Hung),
            Duration::from_millis(200),
        );
        let err = discovery.probe(&url("http://10.0.0.1:8112")).await.unwrap_err();
        assert!(err.is_timeout());
    }
}
