//! Error types for the node pool

use thiserror::Error;

/// Node pool error types
#[derive(Debug, Error)]
pub enum Error {
    /// Connection refused, reset or timed out. The node is down as far as
    /// the pool is concerned.
    #[error("Node {address} unreachable: {reason}")]
    Unreachable {
        address: String,
        reason: String,
        timed_out: bool,
    },

    /// The node answered but the response could not be interpreted.
    #[error("Protocol error from {address}: {reason}")]
    Protocol { address: String, reason: String },

    #[error("None of the {attempted} seed node(s) could be reached")]
    NoReachableSeeds { attempted: usize },

    #[error("No active nodes available")]
    NoActiveNodes,

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Registry bookkeeping is inconsistent. This is a bug, not an outage.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl Error {
    pub(crate) fn unreachable(address: impl ToString, reason: impl ToString) -> Self {
        Self::Unreachable {
            address: address.to_string(),
            reason: reason.to_string(),
            timed_out: false,
        }
    }

    pub(crate) fn timed_out(address: impl ToString, reason: impl ToString) -> Self {
        Self::Unreachable {
            address: address.to_string(),
            reason: reason.to_string(),
            timed_out: true,
        }
    }

    pub(crate) fn protocol(address: impl ToString, reason: impl ToString) -> Self {
        Self::Protocol {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error means "stop using that node"
    #[must_use]
    pub const fn is_node_failure(&self) -> bool {
        matches!(self, Self::Unreachable { .. } | Self::Protocol { .. })
    }

    /// A timed-out probe can't tell a slow node from a dead one
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Unreachable { timed_out: true, .. })
    }
}

/// Result type for node pool operations
pub type Result<T> = std::result::Result<T, Error>;
