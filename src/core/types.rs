// ============================================================================
// Core Identifiers
// ============================================================================
//
// Topology versions, node identifiers and partitions shared by every layer
// of the affinity core.
//
// ============================================================================

use super::error::{GridError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Partition index in `[0, partition_count)`.
pub type Partition = u32;

/// Identifier of a distinct cluster membership view.
///
/// Ordered by `major` first, then `minor`. Membership events bump `major`
/// and reset `minor`; intra-topology events bump `minor`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct TopologyVersion {
    major: u64,
    minor: u32,
}

impl TopologyVersion {
    /// The version that precedes every published view.
    pub const ZERO: TopologyVersion = TopologyVersion { major: 0, minor: 0 };

    pub const fn new(major: u64, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    /// Version of the next membership view.
    pub fn next_major(&self) -> Self {
        Self::new(self.major.saturating_add(1), 0)
    }

    /// Version of the next intra-topology change.
    pub fn next_minor(&self) -> Self {
        Self::new(self.major, self.minor.saturating_add(1))
    }

    /// Returns true if `other` is an immediate successor of this version.
    ///
    /// A saturated component has no successor in its position.
    pub fn is_succeeded_by(&self, other: TopologyVersion) -> bool {
        let next_major = self.major.checked_add(1).map(|major| Self::new(major, 0));
        let next_minor = self
            .minor
            .checked_add(1)
            .map(|minor| Self::new(self.major, minor));
        Some(other) == next_major || Some(other) == next_minor
    }
}

impl From<u64> for TopologyVersion {
    fn from(major: u64) -> Self {
        Self::new(major, 0)
    }
}

impl fmt::Display for TopologyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Opaque identifier of a cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node id, rejecting blank identifiers.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(GridError::InvalidConfiguration(
                "node_id must not be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Hash and Eq of `NodeId` match those of the inner `str`.
impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Builds a list of node ids, failing on the first blank one.
pub fn node_ids<I, S>(ids: I) -> Result<Vec<NodeId>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ids.into_iter().map(NodeId::new).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_order_by_major_then_minor() {
        let a = TopologyVersion::new(3, 7);
        let b = TopologyVersion::new(4, 0);
        assert!(a < b);
        assert!(a.next_minor() < b);
        assert_eq!(a.next_major(), b);
        assert!(a.is_succeeded_by(b));
        assert!(a.is_succeeded_by(TopologyVersion::new(3, 8)));
        assert!(!a.is_succeeded_by(TopologyVersion::new(5, 0)));
        assert_eq!(TopologyVersion::from(9u64).to_string(), "9.0");
    }

    #[test]
    fn saturated_versions_are_not_their_own_successor() {
        let last_minor = TopologyVersion::new(1, u32::MAX);
        assert!(!last_minor.is_succeeded_by(last_minor));
        assert!(last_minor.is_succeeded_by(TopologyVersion::new(2, 0)));

        let last_major = TopologyVersion::new(u64::MAX, 0);
        assert!(!last_major.is_succeeded_by(last_major));
        assert!(last_major.is_succeeded_by(TopologyVersion::new(u64::MAX, 1)));

        let exhausted = TopologyVersion::new(u64::MAX, u32::MAX);
        assert!(!exhausted.is_succeeded_by(exhausted));
    }

    #[test]
    fn blank_node_ids_are_rejected() {
        assert!(NodeId::new("   ").is_err());
        assert_eq!(NodeId::new("node-a").unwrap().as_str(), "node-a");
        assert!(node_ids(["a", "", "c"]).is_err());
    }
}
