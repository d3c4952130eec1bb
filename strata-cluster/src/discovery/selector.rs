//! Node selection for request dispatch
//!
//! The registry never picks a node; dispatchers that want a policy use this.

use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::node::NodeRecord;
use strata_core::SelectionStrategy;

/// Picks among the nodes a caller hands it
#[derive(Debug)]
pub struct NodeSelector {
    strategy: SelectionStrategy,
    round_robin_index: AtomicUsize,
}

impl NodeSelector {
    #[must_use]
    pub const fn new(strategy: SelectionStrategy) -> Self {
        Self {
            strategy,
            round_robin_index: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    /// Pick one node, or `None` for an empty list
    #[must_use]
    pub fn select(&self, nodes: &[NodeRecord]) -> Option<NodeRecord> {
        self.start_index(nodes.len()).map(|i| nodes[i].clone())
    }

    /// All nodes, starting from the selected one and wrapping around
    ///
    /// Dispatchers walk this list to fail over within a single call.
    #[must_use]
    pub fn order(&self, nodes: Vec<NodeRecord>) -> Vec<NodeRecord> {
        let Some(start) = self.start_index(nodes.len()) else {
            return nodes;
        };
        let mut ordered = nodes;
        ordered.rotate_left(start);
        ordered
    }

    fn start_index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }

        let index = match self.strategy {
            SelectionStrategy::Random => rand::thread_rng().gen_range(0..len),
            SelectionStrategy::RoundRobin => {
                self.round_robin_index.fetch_add(1, Ordering::AcqRel) % len
            }
            SelectionStrategy::First => 0,
        };
        Some(index)
    }
}
