use super::types::{Partition, TopologyVersion};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Partition {partition} is out of range for partition_count {partition_count}")]
    PartitionOutOfRange {
        partition: Partition,
        partition_count: u32,
    },

    #[error("Topology version {0} not found (evicted or never published)")]
    VersionNotFound(TopologyVersion),

    #[error("No affinity assignment has been published yet")]
    NoAssignmentYet,

    #[error("Cannot compute affinity for an empty topology")]
    EmptyTopology,

    #[error("Insufficient nodes: {required} required for the backups, {available} available")]
    InsufficientNodes { required: usize, available: usize },

    #[error("Out-of-order topology update: last applied {last}, received {received}")]
    OutOfOrderTopologyUpdate {
        last: TopologyVersion,
        received: TopologyVersion,
    },

    #[error("Topology processing halted after an ordering violation at {0}")]
    TopologyProcessingHalted(TopologyVersion),

    #[error("Topology version {0} is not pinned")]
    NotPinned(TopologyVersion),

    #[error("Node '{0}' appears more than once in the membership view")]
    DuplicateMember(String),

    #[error("Invalid assignment: {0}")]
    InvalidAssignment(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl GridError {
    /// Staleness or caller-input errors; the caller refreshes to `latest()` and retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PartitionOutOfRange { .. } | Self::VersionNotFound(_) | Self::NoAssignmentYet
        )
    }

    /// Errors that must abort the calling operation and must never be retried blindly.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::IllegalState(_)
                | Self::OutOfOrderTopologyUpdate { .. }
                | Self::TopologyProcessingHalted(_)
                | Self::LockError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GridError>;

impl<T> From<std::sync::PoisonError<T>> for GridError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staleness_errors_are_retryable() {
        assert!(GridError::VersionNotFound(TopologyVersion::new(3, 0)).is_retryable());
        assert!(GridError::NoAssignmentYet.is_retryable());
        assert!(!GridError::IllegalState("stopped".into()).is_retryable());
    }

    #[test]
    fn ordering_violations_are_fatal() {
        let err = GridError::OutOfOrderTopologyUpdate {
            last: TopologyVersion::new(4, 0),
            received: TopologyVersion::new(7, 0),
        };
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "Out-of-order topology update: last applied 4.0, received 7.0"
        );
        assert!(!GridError::EmptyTopology.is_fatal());
    }
}
