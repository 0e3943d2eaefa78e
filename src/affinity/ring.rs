use super::function::{
    AffinityContext, AffinityFunction, BackupFilter, log_movement, plan_placement, select_owners,
};
use super::hash::{partition_hash, virtual_node_hash};
use crate::config::InsufficientNodesPolicy;
use crate::core::{NodeId, Partition, Result};
use std::fmt;

/// Consistent hashing over a virtual-node ring.
///
/// Each member contributes `virtual_nodes` points. A partition's primary is
/// the first point at or after the partition's hash (wrapping), backups are
/// the next distinct members walking further. Adding or removing a member
/// only moves the partitions whose arc that member wins or loses.
#[derive(Clone)]
pub struct ConsistentHashAffinity {
    virtual_nodes: u32,
    policy: InsufficientNodesPolicy,
    backup_filter: Option<BackupFilter>,
}

/// One ring point: hash plus index into the sorted member list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct RingPoint {
    hash: u64,
    member: usize,
}

impl ConsistentHashAffinity {
    pub fn new(virtual_nodes: u32) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            policy: InsufficientNodesPolicy::default(),
            backup_filter: None,
        }
    }

    pub fn with_policy(mut self, policy: InsufficientNodesPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_backup_filter(mut self, filter: BackupFilter) -> Self {
        self.backup_filter = Some(filter);
        self
    }

    pub fn virtual_nodes(&self) -> u32 {
        self.virtual_nodes
    }

    /// Builds the ring for members sorted by id.
    ///
    /// Points sort by `(hash, member index)`; since member indices follow id
    /// order, colliding hashes are broken by `NodeId` lexicographically.
    fn build_ring(&self, members: &[NodeId]) -> Vec<RingPoint> {
        let mut ring = Vec::with_capacity(members.len() * self.virtual_nodes as usize);
        for (member, node) in members.iter().enumerate() {
            for index in 0..self.virtual_nodes {
                ring.push(RingPoint {
                    hash: virtual_node_hash(node, index),
                    member,
                });
            }
        }
        ring.sort_unstable();
        ring
    }
}

/// Member indices met walking clockwise from `target`, wrapping once.
fn walk_from(ring: &[RingPoint], target: u64) -> impl Iterator<Item = usize> + '_ {
    let start = ring.partition_point(|point| point.hash < target);
    (0..ring.len()).map(move |offset| ring[(start + offset) % ring.len()].member)
}

impl Default for ConsistentHashAffinity {
    fn default() -> Self {
        Self::new(128)
    }
}

impl fmt::Debug for ConsistentHashAffinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsistentHashAffinity")
            .field("virtual_nodes", &self.virtual_nodes)
            .field("policy", &self.policy)
            .field("backup_filter", &self.backup_filter.is_some())
            .finish()
    }
}

impl AffinityFunction for ConsistentHashAffinity {
    fn name(&self) -> &'static str {
        "consistent-hash"
    }

    fn assign_partitions(&self, ctx: &AffinityContext<'_>) -> Result<Vec<Vec<NodeId>>> {
        let plan = plan_placement(self.name(), ctx, self.policy)?;
        let ring = self.build_ring(&plan.members);

        let mut assignment = Vec::with_capacity(ctx.partition_count as usize);
        for partition in 0..ctx.partition_count as Partition {
            let walk = walk_from(&ring, partition_hash(partition))
                .map(|member| &plan.members[member]);
            assignment.push(select_owners(
                walk,
                plan.owners_per_partition,
                self.backup_filter.as_ref(),
            ));
        }

        log_movement(self.name(), ctx, &assignment);
        Ok(assignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node_ids;

    #[test]
    fn ring_has_virtual_nodes_per_member() {
        let affinity = ConsistentHashAffinity::new(16);
        let members = node_ids(["a", "b", "c"]).unwrap();
        let ring = affinity.build_ring(&members);
        assert_eq!(ring.len(), 48);
        assert!(ring.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn single_member_owns_everything() {
        let affinity = ConsistentHashAffinity::new(8);
        let members = node_ids(["solo"]).unwrap();
        let result = affinity
            .assign_partitions(&AffinityContext::new(32, 0, &members))
            .unwrap();
        assert_eq!(result.len(), 32);
        assert!(result.iter().all(|owners| owners == &members));
    }

    #[test]
    fn colliding_points_resolve_to_smaller_node_id() {
        let members = node_ids(["alpha", "beta", "gamma"]).unwrap();
        let mut ring = vec![
            RingPoint { hash: 500, member: 2 },
            RingPoint { hash: 100, member: 1 },
            RingPoint { hash: 100, member: 0 },
        ];
        ring.sort_unstable();

        let owners_at = |target: u64| {
            walk_from(&ring, target)
                .map(|member| members[member].as_str())
                .collect::<Vec<_>>()
        };
        assert_eq!(owners_at(100), vec!["alpha", "beta", "gamma"]);
        assert_eq!(owners_at(40), vec!["alpha", "beta", "gamma"]);
        assert_eq!(owners_at(101), vec!["gamma", "alpha", "beta"]);
        assert_eq!(owners_at(900), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn zero_virtual_nodes_is_clamped() {
        assert_eq!(ConsistentHashAffinity::new(0).virtual_nodes(), 1);
    }
}
