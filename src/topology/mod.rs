// ============================================================================
// Topology Module
// ============================================================================
//
// Membership views and the coordinator that turns them into published
// affinity assignments.
//
// ============================================================================

pub mod coordinator;
pub mod discovery;
pub mod membership;

pub use coordinator::{AffinityReadGuard, KeyRoute, TopologyCoordinator};
pub use discovery::InMemoryDiscovery;
pub use membership::{ClusterMembership, MembershipEvent, MembershipEventKind, MembershipListener};
