//! Cluster node discovery and health watching

pub mod node;
pub mod node_registry;
pub mod topology;
pub mod http_client;
pub mod membership;
pub mod health_watch;
pub mod selector;

pub use node::{parse_address, NodeKey, NodeRecord};
pub use node_registry::{MergeOutcome, NodeRegistry, NodeStatus, Resolution};
pub use topology::{GossipEntry, GossipView, TopologyClient, TopologyMember, TopologyView};
pub use http_client::HttpTopologyClient;
pub use membership::{Discovery, ProbeReport, RefreshReport};
pub use health_watch::{HealthWatch, PassSummary};
pub use selector::NodeSelector;
