use crate::core::{GridError, NodeId, Result, TopologyVersion};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Maintains the set of live nodes in the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ClusterMembership {
    #[serde(default)]
    nodes: HashSet<NodeId>,
}

impl ClusterMembership {
    /// Creates a membership set from a list of node ids.
    pub fn new<I, S>(nodes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut membership = Self::default();
        for node in nodes {
            membership.add_node(node)?;
        }
        Ok(membership)
    }

    /// Adds a node. Returns false if it was already a member.
    pub fn add_node(&mut self, node_id: impl Into<String>) -> Result<bool> {
        Ok(self.nodes.insert(NodeId::new(node_id)?))
    }

    /// Removes a node.
    ///
    /// Returns true if the node was present.
    pub fn remove_node(&mut self, node_id: &str) -> bool {
        self.nodes.remove(node_id)
    }

    /// Checks if a node is part of the cluster.
    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns a sorted list of all nodes.
    pub fn all_nodes(&self) -> Vec<NodeId> {
        let mut nodes = self.nodes.iter().cloned().collect::<Vec<_>>();
        nodes.sort();
        nodes
    }
}

/// What caused a membership view to change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MembershipEventKind {
    /// First view seen by this node.
    Initial,
    NodeJoined(NodeId),
    NodeLeft(NodeId),
    NodeFailed(NodeId),
    /// Same members, new minor version.
    MetadataChanged,
}

/// A membership view delivered by discovery.
///
/// `topology_version` is the version the new view is published under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MembershipEvent {
    pub topology_version: TopologyVersion,
    pub members: Vec<NodeId>,
    pub kind: MembershipEventKind,
}

impl MembershipEvent {
    pub fn new(topology_version: impl Into<TopologyVersion>, members: Vec<NodeId>) -> Self {
        Self {
            topology_version: topology_version.into(),
            members,
            kind: MembershipEventKind::Initial,
        }
    }

    pub fn with_kind(mut self, kind: MembershipEventKind) -> Self {
        self.kind = kind;
        self
    }

    /// Builds an event from string ids.
    pub fn from_ids<I, S>(topology_version: impl Into<TopologyVersion>, ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members = ids
            .into_iter()
            .map(NodeId::new)
            .collect::<Result<Vec<_>>>()?;
        if members.is_empty() {
            return Err(GridError::EmptyTopology);
        }
        Ok(Self::new(topology_version, members))
    }
}

/// Consumer of ordered membership events.
///
/// Discovery calls this exactly once per event, in increasing version order,
/// never concurrently for the same listener.
#[async_trait]
pub trait MembershipListener: Send + Sync {
    async fn on_membership_change(&self, event: MembershipEvent) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_primitives_work() {
        let mut membership = ClusterMembership::new(["node-b", "node-a"]).unwrap();
        assert!(membership.add_node("node-c").unwrap());
        assert!(!membership.add_node("node-c").unwrap());
        assert!(membership.contains("node-b"));
        assert!(membership.remove_node("node-b"));
        assert!(!membership.remove_node("node-b"));
        assert_eq!(
            membership
                .all_nodes()
                .iter()
                .map(NodeId::as_str)
                .collect::<Vec<_>>(),
            vec!["node-a", "node-c"]
        );
        assert!(membership.add_node(" ").is_err());
    }

    #[test]
    fn events_from_ids_reject_empty_views() {
        let event = MembershipEvent::from_ids(3u64, ["a", "b"]).unwrap();
        assert_eq!(event.topology_version, TopologyVersion::new(3, 0));
        assert_eq!(event.kind, MembershipEventKind::Initial);
        assert!(matches!(
            MembershipEvent::from_ids(1u64, Vec::<String>::new()),
            Err(GridError::EmptyTopology)
        ));
    }
}
