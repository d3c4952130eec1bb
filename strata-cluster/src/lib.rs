pub mod discovery;
pub mod error;
pub mod pool;

pub use error::{Error, Result};
pub use discovery::{
    Discovery, HealthWatch, HttpTopologyClient, NodeKey, NodeRecord, NodeRegistry, NodeSelector,
    TopologyClient, TopologyView,
};
pub use pool::NodePool;
