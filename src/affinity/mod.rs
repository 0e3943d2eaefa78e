// ============================================================================
// Affinity Module
// ============================================================================
//
// Partition placement and the versioned store of its results.
//
// - function:   the pluggable `AffinityFunction` capability
// - ring:       consistent hashing over virtual nodes (default)
// - rendezvous: highest-random-weight hashing
// - assignment: immutable partition table with reverse lookups
// - history:    bounded, pinnable store keyed by topology version
//
// ============================================================================

pub mod assignment;
pub mod function;
pub mod hash;
pub mod history;
pub mod rendezvous;
pub mod ring;

pub use assignment::{AffinityAssignment, AssignmentSnapshot, PartitionMovement};
pub use function::{AffinityContext, AffinityFunction, BackupFilter, affinity_function_for};
pub use hash::partition_for_key;
pub use history::{AffinityAssignmentHistory, PinnedAssignment};
pub use rendezvous::RendezvousAffinity;
pub use ring::ConsistentHashAffinity;
