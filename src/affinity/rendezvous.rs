use super::function::{
    AffinityContext, AffinityFunction, BackupFilter, log_movement, plan_placement, select_owners,
};
use super::hash::rendezvous_weight;
use crate::config::InsufficientNodesPolicy;
use crate::core::{NodeId, Partition, Result};
use std::cmp::Reverse;
use std::fmt;

/// Highest-random-weight placement.
///
/// Members are ranked per partition by a stable weight; the heaviest member is
/// primary. Equal weights rank by `NodeId`.
#[derive(Clone, Default)]
pub struct RendezvousAffinity {
    policy: InsufficientNodesPolicy,
    backup_filter: Option<BackupFilter>,
}

impl RendezvousAffinity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: InsufficientNodesPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_backup_filter(mut self, filter: BackupFilter) -> Self {
        self.backup_filter = Some(filter);
        self
    }
}

/// Orders member indices by descending weight; equal weights keep index
/// order, which is `NodeId` order for sorted members.
fn rank_members<F>(ranked: &mut Vec<(Reverse<u64>, usize)>, members: &[NodeId], weight: F)
where
    F: Fn(&NodeId) -> u64,
{
    ranked.clear();
    ranked.extend(
        members
            .iter()
            .enumerate()
            .map(|(index, node)| (Reverse(weight(node)), index)),
    );
    ranked.sort_unstable();
}

impl fmt::Debug for RendezvousAffinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendezvousAffinity")
            .field("policy", &self.policy)
            .field("backup_filter", &self.backup_filter.is_some())
            .finish()
    }
}

impl AffinityFunction for RendezvousAffinity {
    fn name(&self) -> &'static str {
        "rendezvous"
    }

    fn assign_partitions(&self, ctx: &AffinityContext<'_>) -> Result<Vec<Vec<NodeId>>> {
        let plan = plan_placement(self.name(), ctx, self.policy)?;

        let mut ranked = Vec::with_capacity(plan.members.len());
        let mut assignment = Vec::with_capacity(ctx.partition_count as usize);
        for partition in 0..ctx.partition_count as Partition {
            rank_members(&mut ranked, &plan.members, |node| {
                rendezvous_weight(partition, node)
            });
            assignment.push(select_owners(
                ranked.iter().map(|(_, index)| &plan.members[*index]),
                plan.owners_per_partition,
                self.backup_filter.as_ref(),
            ));
        }

        log_movement(self.name(), ctx, &assignment);
        Ok(assignment)
    }
}
