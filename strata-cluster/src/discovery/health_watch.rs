//! Background health watch for cluster nodes
//!
//! Every interval the watch re-walks the active set's topology, deactivates
//! nodes that stopped answering, and re-probes inactive nodes so they can come
//! back. Inactive nodes are retried forever; nothing is ever evicted.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::membership::{Discovery, RefreshReport};
use super::node::{NodeKey, NodeRecord};
use crate::error::Result;

/// What one watch pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub deactivated: usize,
    pub reactivated: usize,
    pub added: usize,
    pub relocated: usize,
    /// Timed-out nodes kept active because a peer's gossip vouched for them
    pub kept_by_gossip: usize,
}

/// Periodic re-discovery and liveness checks
///
/// The watch holds the registry (through `Discovery`); the registry knows
/// nothing about the watch.
#[derive(Clone)]
pub struct HealthWatch {
    discovery: Arc<Discovery>,
    interval: Duration,
    gossip_max_age: Option<Duration>,
}

impl HealthWatch {
    #[must_use]
    pub const fn new(discovery: Arc<Discovery>, interval: Duration) -> Self {
        Self {
            discovery,
            interval,
            gossip_max_age: None,
        }
    }

    /// Consult a peer's gossip before deactivating a node whose probe timed out
    #[must_use]
    pub const fn with_gossip_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.gossip_max_age = max_age;
        self
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the watch loop on the current runtime
    ///
    /// The first pass runs one interval from now. Cancelling `cancel_token`
    /// stops further passes; a pass that is already running completes.
    /// Starting a second loop does not stop the first one.
    pub fn start(&self, cancel_token: CancellationToken) -> JoinHandle<()> {
        let watch = self.clone();
        tokio::spawn(async move { watch.run(cancel_token).await })
    }

    async fn run(self, cancel_token: CancellationToken) {
        let mut timer = interval_at(Instant::now() + self.interval, self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval = ?self.interval, "Health watch started");
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    tracing::info!("Health watch shutting down");
                    return;
                }
                _ = timer.tick() => {}
            }

            match self.run_pass().await {
                Ok(summary) if summary != PassSummary::default() => {
                    tracing::info!(
                        deactivated = summary.deactivated,
                        reactivated = summary.reactivated,
                        added = summary.added,
                        relocated = summary.relocated,
                        kept_by_gossip = summary.kept_by_gossip,
                        "Cluster membership changed"
                    );
                }
                Ok(_) => tracing::trace!("Health watch pass found no changes"),
                Err(e) => tracing::error!(error = %e, "Health watch pass aborted"),
            }
        }
    }

    /// Run a single pass
    ///
    /// Each node is probed at most once per pass: nodes deactivated by this
    /// pass are not re-probed until the next one.
    pub async fn run_pass(&self) -> Result<PassSummary> {
        let registry = self.discovery.registry();
        let inactive_before: HashSet<NodeKey> =
            registry.list_inactive().iter().map(NodeRecord::key).collect();

        let report = self.discovery.refresh().await?;
        let mut summary = PassSummary {
            added: report.added,
            relocated: report.relocated,
            ..PassSummary::default()
        };

        let vouched = self.vouched_by_gossip(&report).await;
        let mut down = Vec::new();
        for (record, _) in &report.failed {
            if record.identifier.as_ref().is_some_and(|id| vouched.contains(id)) {
                summary.kept_by_gossip += 1;
            } else {
                down.push(record);
            }
        }

        for record in &report.reached {
            if !self.listed_in_topology(record, &report) {
                tracing::warn!(node = %record, "Node is no longer listed in the cluster topology");
                down.push(record);
            }
        }

        summary.deactivated = registry.deactivate(down)?;

        // addresses may have moved during the merge, so re-read the records.
        // A node the cluster no longer lists stays out even if it still answers.
        let retry: Vec<NodeRecord> = registry
            .list_inactive()
            .into_iter()
            .filter(|record| inactive_before.contains(&record.key()))
            .filter(|record| {
                let listed = self.listed_in_topology(record, &report);
                if !listed {
                    tracing::debug!(node = %record, "Skipping re-probe of node absent from topology");
                }
                listed
            })
            .collect();
        let probed = self.discovery.probe_nodes(&retry).await?;
        summary.reactivated = probed.recovered.len();

        Ok(summary)
    }

    /// False only for a resolved node missing from every topology fetched this
    /// pass. Without a usable topology every node counts as listed.
    fn listed_in_topology(&self, record: &NodeRecord, report: &RefreshReport) -> bool {
        if !self.discovery.merges_topology() || !report.saw_topology {
            return true;
        }
        record
            .identifier
            .as_ref()
            .is_none_or(|id| report.seen.contains(id))
    }

    /// Identifiers of timed-out nodes that a reachable peer heard from recently
    async fn vouched_by_gossip(&self, report: &RefreshReport) -> HashSet<String> {
        let Some(max_age) = self.gossip_max_age else {
            return HashSet::new();
        };

        let timed_out: Vec<&str> = report
            .failed
            .iter()
            .filter(|(_, error)| error.is_timeout())
            .filter_map(|(record, _)| record.identifier.as_deref())
            .collect();
        if timed_out.is_empty() {
            return HashSet::new();
        }

        for peer in &report.reached {
            let view = match self.discovery.gossip(&peer.address).await {
                Ok(view) => view,
                Err(e) => {
                    tracing::debug!(node = %peer, error = %e, "Gossip unavailable from peer");
                    continue;
                }
            };

            return timed_out
                .into_iter()
                .filter(|id| {
                    let fresh = view.age_of(id).is_some_and(|age| age <= max_age);
                    if fresh {
                        tracing::info!(
                            node_id = %id,
                            reporter = %view.reporter,
                            "Probe timed out but peer gossip reports the node alive"
                        );
                    }
                    fresh
                })
                .map(str::to_string)
                .collect();
        }

        HashSet::new()
    }
}
