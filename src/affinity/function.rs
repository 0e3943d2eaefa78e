use super::assignment::AffinityAssignment;
use super::hash;
use super::rendezvous::RendezvousAffinity;
use super::ring::ConsistentHashAffinity;
use crate::config::{AffinityConfig, AffinityStrategy, InsufficientNodesPolicy};
use crate::core::{GridError, NodeId, Partition, Result};
use log::{debug, warn};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Predicate deciding whether `candidate` may hold a backup copy given the
/// owners already chosen for the partition (primary first).
pub type BackupFilter = Arc<dyn Fn(&NodeId, &[NodeId]) -> bool + Send + Sync>;

/// Inputs of one affinity computation.
#[derive(Debug, Clone, Copy)]
pub struct AffinityContext<'a> {
    pub partition_count: u32,
    pub backups: u32,
    pub previous: Option<&'a AffinityAssignment>,
    pub members: &'a [NodeId],
}

impl<'a> AffinityContext<'a> {
    pub fn new(partition_count: u32, backups: u32, members: &'a [NodeId]) -> Self {
        Self {
            partition_count,
            backups,
            previous: None,
            members,
        }
    }

    pub fn with_previous(mut self, previous: Option<&'a AffinityAssignment>) -> Self {
        self.previous = previous;
        self
    }
}

/// Computes partition owners from a membership view.
///
/// Implementations must be deterministic: identical `(partition_count,
/// backups, members)` produce identical output on every node, whatever the
/// member order or call history.
pub trait AffinityFunction: Send + Sync + fmt::Debug {
    /// Short strategy name used in logs.
    fn name(&self) -> &'static str;

    /// Returns owners per partition, primary first.
    fn assign_partitions(&self, ctx: &AffinityContext<'_>) -> Result<Vec<Vec<NodeId>>>;

    /// Maps a key to its partition.
    fn partition_for_key(&self, key: &[u8], partition_count: u32) -> Partition {
        hash::partition_for_key(key, partition_count)
    }
}

/// Builds the configured affinity function.
pub fn affinity_function_for(config: &AffinityConfig) -> Arc<dyn AffinityFunction> {
    match config.strategy {
        AffinityStrategy::ConsistentHash => Arc::new(
            ConsistentHashAffinity::new(config.virtual_nodes)
                .with_policy(config.insufficient_nodes),
        ),
        AffinityStrategy::Rendezvous => {
            Arc::new(RendezvousAffinity::new().with_policy(config.insufficient_nodes))
        }
    }
}

/// Validated placement inputs.
pub(crate) struct PlacementPlan {
    /// Members sorted by id; index order doubles as the collision tie-break.
    pub members: Vec<NodeId>,
    /// Primary plus backups per partition.
    pub owners_per_partition: usize,
}

/// Validates the context and applies the insufficient-nodes policy.
pub(crate) fn plan_placement(
    strategy: &str,
    ctx: &AffinityContext<'_>,
    policy: InsufficientNodesPolicy,
) -> Result<PlacementPlan> {
    if ctx.partition_count == 0 {
        return Err(GridError::InvalidConfiguration(
            "partition_count must be > 0".to_string(),
        ));
    }
    if ctx.members.is_empty() {
        return Err(GridError::EmptyTopology);
    }

    let mut seen = HashSet::with_capacity(ctx.members.len());
    for member in ctx.members {
        if !seen.insert(member) {
            return Err(GridError::DuplicateMember(member.to_string()));
        }
    }

    let mut members = ctx.members.to_vec();
    members.sort();

    let required = (ctx.backups as usize).saturating_add(1);
    let available = members.len();
    let owners_per_partition = if available < required {
        match policy {
            InsufficientNodesPolicy::Fail => {
                return Err(GridError::InsufficientNodes {
                    required,
                    available,
                });
            }
            InsufficientNodesPolicy::ReduceBackups => {
                warn!(
                    "{} affinity: {} backups requested, only {} nodes available, assigning {}",
                    strategy,
                    ctx.backups,
                    available,
                    available - 1
                );
                available
            }
        }
    } else {
        required
    };

    Ok(PlacementPlan {
        members,
        owners_per_partition,
    })
}

/// Picks owners from candidates in preference order.
///
/// The first candidate becomes primary; later ones are deduplicated and must
/// pass the backup filter. Stops once `wanted` owners are chosen.
pub(crate) fn select_owners<'a, I>(
    candidates: I,
    wanted: usize,
    filter: Option<&BackupFilter>,
) -> Vec<NodeId>
where
    I: IntoIterator<Item = &'a NodeId>,
{
    let mut owners: Vec<NodeId> = Vec::with_capacity(wanted);
    for candidate in candidates {
        if owners.len() == wanted {
            break;
        }
        if owners.contains(candidate) {
            continue;
        }
        if !owners.is_empty()
            && let Some(filter) = filter
            && !filter(candidate, owners.as_slice())
        {
            continue;
        }
        owners.push(candidate.clone());
    }
    owners
}

/// Debug-logs how many primaries moved relative to the previous assignment.
pub(crate) fn log_movement(strategy: &str, ctx: &AffinityContext<'_>, result: &[Vec<NodeId>]) {
    let Some(previous) = ctx.previous else {
        return;
    };
    if previous.partition_count() as usize != result.len() {
        return;
    }
    let moved = result
        .iter()
        .enumerate()
        .filter(|(partition, owners)| {
            previous
                .owners_of(*partition as Partition)
                .ok()
                .and_then(|prev| prev.first())
                != owners.first()
        })
        .count();
    debug!(
        "{} affinity: {} of {} primaries moved since {}",
        strategy,
        moved,
        result.len(),
        previous.topology_version()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node_ids;

    #[test]
    fn plan_rejects_empty_and_duplicate_members() {
        let empty: Vec<NodeId> = Vec::new();
        let ctx = AffinityContext::new(8, 0, &empty);
        assert!(matches!(
            plan_placement("test", &ctx, InsufficientNodesPolicy::Fail),
            Err(GridError::EmptyTopology)
        ));

        let dupes = node_ids(["a", "b", "a"]).unwrap();
        let ctx = AffinityContext::new(8, 0, &dupes);
        assert!(matches!(
            plan_placement("test", &ctx, InsufficientNodesPolicy::Fail),
            Err(GridError::DuplicateMember(node)) if node == "a"
        ));
    }

    #[test]
    fn plan_applies_insufficient_nodes_policy() {
        let members = node_ids(["b", "a"]).unwrap();
        let ctx = AffinityContext::new(8, 3, &members);

        let reduced = plan_placement("test", &ctx, InsufficientNodesPolicy::ReduceBackups).unwrap();
        assert_eq!(reduced.owners_per_partition, 2);
        assert_eq!(reduced.members, node_ids(["a", "b"]).unwrap());

        assert_eq!(
            plan_placement("test", &ctx, InsufficientNodesPolicy::Fail).err(),
            Some(GridError::InsufficientNodes {
                required: 4,
                available: 2
            })
        );
    }

    #[test]
    fn select_owners_skips_duplicates_and_filtered_backups() {
        let nodes = node_ids(["a", "a", "b", "c", "d"]).unwrap();
        let no_b: BackupFilter =
            Arc::new(|candidate: &NodeId, _: &[NodeId]| candidate.as_str() != "b");

        let owners = select_owners(&nodes, 3, Some(&no_b));
        assert_eq!(owners, node_ids(["a", "c", "d"]).unwrap());

        let owners = select_owners(&nodes, 2, None);
        assert_eq!(owners, node_ids(["a", "b"]).unwrap());
    }
}
