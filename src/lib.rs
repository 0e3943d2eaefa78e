// ============================================================================
// MemoGrid Library
// ============================================================================
//
// Partition affinity core for a clustered in-memory data grid:
//
// - core:      identifiers, topology versions and the error type
// - config:    affinity configuration (serde)
// - affinity:  placement functions, assignments and their history
// - lifecycle: the reader/writer gateway guarding shutdown
// - topology:  membership events and the coordinator applying them
//
// ============================================================================

//! Maps data partitions onto cluster nodes and keeps the mapping correct
//! while nodes join, leave and the process shuts down.
//!
//! ```
//! use memogrid::{AffinityConfig, GridError, MembershipEvent, TopologyCoordinator};
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! runtime
//!     .block_on(async {
//!         let config = AffinityConfig::new().partition_count(64).backups(1);
//!         let coordinator = TopologyCoordinator::new(config)?;
//!         coordinator.start().await?;
//!
//!         let event = MembershipEvent::from_ids(1u64, ["node-a", "node-b", "node-c"])?;
//!         coordinator.apply_membership_change(event).await?;
//!
//!         let route = coordinator.route_for(b"user:42").await?;
//!         assert_eq!(route.backups.len(), 1);
//!
//!         coordinator.shutdown().await?;
//!         Ok::<(), GridError>(())
//!     })
//!     .unwrap();
//! ```

pub mod affinity;
pub mod config;
pub mod core;
pub mod lifecycle;
pub mod topology;

pub use affinity::{
    AffinityAssignment, AffinityAssignmentHistory, AffinityContext, AffinityFunction,
    AssignmentSnapshot, BackupFilter, ConsistentHashAffinity, PartitionMovement,
    PinnedAssignment, RendezvousAffinity, affinity_function_for, partition_for_key,
};
pub use config::{AffinityConfig, AffinityStrategy, InsufficientNodesPolicy};
pub use core::{GridError, NodeId, Partition, Result, TopologyVersion, node_ids};
pub use lifecycle::{
    GatewayReadGuard, GatewayState, GatewayWriteGuard, LifecycleGateway, StopListener,
    StopListenerId,
};
pub use topology::{
    AffinityReadGuard, ClusterMembership, InMemoryDiscovery, KeyRoute, MembershipEvent,
    MembershipEventKind, MembershipListener, TopologyCoordinator,
};
