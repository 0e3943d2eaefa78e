use crate::core::{GridError, NodeId, Partition, Result, TopologyVersion};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::{Hash, Hasher};

static NO_PARTITIONS: BTreeSet<Partition> = BTreeSet::new();

/// Partition owners computed for one topology version.
///
/// Immutable once built. The node→partition maps are derived in a single
/// pass at construction, so the value is safe to share across threads
/// behind an `Arc`.
#[derive(Debug)]
pub struct AffinityAssignment {
    topology_version: TopologyVersion,
    members: Vec<NodeId>,
    assignment: Vec<Vec<NodeId>>,
    primary_partitions: HashMap<NodeId, BTreeSet<Partition>>,
    backup_partitions: HashMap<NodeId, BTreeSet<Partition>>,
    effective_backups: usize,
    computed_at: DateTime<Utc>,
}

/// Owner change of a single partition between two assignments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionMovement {
    pub partition: Partition,
    pub previous_owners: Vec<NodeId>,
    pub next_owners: Vec<NodeId>,
}

impl PartitionMovement {
    /// Returns true if the primary owner changed.
    pub fn primary_changed(&self) -> bool {
        self.previous_owners.first() != self.next_owners.first()
    }
}

/// Serializable view of an assignment, for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssignmentSnapshot {
    pub topology_version: TopologyVersion,
    pub computed_at: DateTime<Utc>,
    pub members: Vec<NodeId>,
    pub partitions: Vec<Vec<NodeId>>,
}

impl AffinityAssignment {
    /// Wraps a raw partition→owners table.
    ///
    /// Checks that:
    /// - at least one partition is present,
    /// - every partition has a primary,
    /// - no node appears twice in one owner list,
    /// - every owner belongs to `members`.
    pub fn new(
        topology_version: TopologyVersion,
        members: Vec<NodeId>,
        assignment: Vec<Vec<NodeId>>,
    ) -> Result<Self> {
        if assignment.is_empty() {
            return Err(GridError::InvalidAssignment(
                "assignment must cover at least one partition".to_string(),
            ));
        }
        if u32::try_from(assignment.len()).is_err() {
            return Err(GridError::InvalidAssignment(format!(
                "{} partitions exceed the supported range",
                assignment.len()
            )));
        }

        let mut members = members;
        members.sort();
        if let Some(pair) = members.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(GridError::DuplicateMember(pair[0].to_string()));
        }
        let known: HashSet<&NodeId> = members.iter().collect();

        let mut primary_partitions: HashMap<NodeId, BTreeSet<Partition>> = HashMap::new();
        let mut backup_partitions: HashMap<NodeId, BTreeSet<Partition>> = HashMap::new();
        let mut effective_backups = usize::MAX;

        for (index, owners) in assignment.iter().enumerate() {
            let partition = index as Partition;
            let Some((primary, backups)) = owners.split_first() else {
                return Err(GridError::InvalidAssignment(format!(
                    "Partition {} has no primary owner",
                    partition
                )));
            };

            let mut dedupe = HashSet::with_capacity(owners.len());
            for owner in owners {
                if !known.contains(owner) {
                    return Err(GridError::InvalidAssignment(format!(
                        "Owner '{}' of partition {} is not part of the membership view",
                        owner, partition
                    )));
                }
                if !dedupe.insert(owner) {
                    return Err(GridError::InvalidAssignment(format!(
                        "Node '{}' appears more than once for partition {}",
                        owner, partition
                    )));
                }
            }

            primary_partitions
                .entry(primary.clone())
                .or_default()
                .insert(partition);
            for backup in backups {
                backup_partitions
                    .entry(backup.clone())
                    .or_default()
                    .insert(partition);
            }
            effective_backups = effective_backups.min(backups.len());
        }

        Ok(Self {
            topology_version,
            members,
            assignment,
            primary_partitions,
            backup_partitions,
            effective_backups,
            computed_at: Utc::now(),
        })
    }

    pub fn topology_version(&self) -> TopologyVersion {
        self.topology_version
    }

    pub fn partition_count(&self) -> u32 {
        self.assignment.len() as u32
    }

    /// Sorted membership view the assignment was computed from.
    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    pub fn computed_at(&self) -> DateTime<Utc> {
        self.computed_at
    }

    /// Smallest backup count over all partitions.
    ///
    /// Lower than the configured count when backups were reduced for a small
    /// topology or a backup filter rejected candidates.
    pub fn effective_backups(&self) -> usize {
        self.effective_backups
    }

    /// Owners of `partition`, primary first.
    pub fn owners_of(&self, partition: Partition) -> Result<&[NodeId]> {
        self.assignment
            .get(partition as usize)
            .map(Vec::as_slice)
            .ok_or(GridError::PartitionOutOfRange {
                partition,
                partition_count: self.partition_count(),
            })
    }

    /// Primary owner of `partition`.
    pub fn primary(&self, partition: Partition) -> Result<&NodeId> {
        let owners = self.owners_of(partition)?;
        owners.first().ok_or_else(|| {
            GridError::InvalidAssignment(format!("Partition {} has no primary owner", partition))
        })
    }

    /// Partitions for which `node` is primary; empty if none.
    pub fn primary_partitions(&self, node: &NodeId) -> &BTreeSet<Partition> {
        self.primary_partitions.get(node).unwrap_or(&NO_PARTITIONS)
    }

    /// Partitions for which `node` holds a backup; empty if none.
    pub fn backup_partitions(&self, node: &NodeId) -> &BTreeSet<Partition> {
        self.backup_partitions.get(node).unwrap_or(&NO_PARTITIONS)
    }

    pub fn is_primary(&self, node: &NodeId, partition: Partition) -> bool {
        self.primary_partitions(node).contains(&partition)
    }

    pub fn is_backup(&self, node: &NodeId, partition: Partition) -> bool {
        self.backup_partitions(node).contains(&partition)
    }

    /// Full partition table, indexed by partition.
    pub fn partitions(&self) -> &[Vec<NodeId>] {
        &self.assignment
    }

    /// Partitions whose owner list differs from `previous`.
    pub fn diff(&self, previous: &AffinityAssignment) -> Vec<PartitionMovement> {
        let count = self.assignment.len().max(previous.assignment.len());
        (0..count)
            .filter_map(|index| {
                let next = self.assignment.get(index).cloned().unwrap_or_default();
                let prev = previous.assignment.get(index).cloned().unwrap_or_default();
                (next != prev).then(|| PartitionMovement {
                    partition: index as Partition,
                    previous_owners: prev,
                    next_owners: next,
                })
            })
            .collect()
    }

    /// Number of partitions whose primary differs from `previous`.
    pub fn primary_changes(&self, previous: &AffinityAssignment) -> usize {
        let count = self.assignment.len().max(previous.assignment.len());
        (0..count)
            .filter(|index| {
                self.assignment.get(*index).and_then(|owners| owners.first())
                    != previous.assignment.get(*index).and_then(|owners| owners.first())
            })
            .count()
    }

    pub fn snapshot(&self) -> AssignmentSnapshot {
        AssignmentSnapshot {
            topology_version: self.topology_version,
            computed_at: self.computed_at,
            members: self.members.clone(),
            partitions: self.assignment.clone(),
        }
    }
}

// Assignments are identified by version: content is a pure function of the
// inputs that produced that version.
impl PartialEq for AffinityAssignment {
    fn eq(&self, other: &Self) -> bool {
        self.topology_version == other.topology_version
    }
}

impl Eq for AffinityAssignment {}

impl Hash for AffinityAssignment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.topology_version.hash(state);
    }
}
