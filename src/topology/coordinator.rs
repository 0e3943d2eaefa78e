// ============================================================================
// Topology Coordinator
// ============================================================================
//
// Applies membership views in version order:
//
//   write lock -> state check -> order check -> affinity -> publish -> unlock
//
// An ordering violation means the discovery layer broke its guarantee. The
// coordinator then halts and rejects every later view until it is rebuilt.
//
// ============================================================================

use super::membership::{MembershipEvent, MembershipListener};
use crate::affinity::{
    AffinityAssignment, AffinityAssignmentHistory, AffinityContext, AffinityFunction,
    PinnedAssignment, affinity_function_for,
};
use crate::config::AffinityConfig;
use crate::core::{GridError, NodeId, Partition, Result, TopologyVersion};
use crate::lifecycle::{GatewayReadGuard, LifecycleGateway};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{Level, event, info_span};

/// Routing answer for one key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyRoute {
    pub topology_version: TopologyVersion,
    pub partition: Partition,
    pub primary: NodeId,
    pub backups: Vec<NodeId>,
}

#[derive(Debug, Default)]
struct Sequence {
    /// Last view that passed the order check, applied or not.
    last_seen: Option<TopologyVersion>,
    halted_at: Option<TopologyVersion>,
}

pub struct TopologyCoordinator {
    config: AffinityConfig,
    function: Arc<dyn AffinityFunction>,
    history: Arc<AffinityAssignmentHistory>,
    gateway: Arc<LifecycleGateway>,
    sequence: Mutex<Sequence>,
}

impl TopologyCoordinator {
    /// Creates a coordinator using the configured affinity strategy.
    pub fn new(config: AffinityConfig) -> Result<Self> {
        let function = affinity_function_for(&config);
        Self::with_function(config, function)
    }

    /// Creates a coordinator with a custom affinity function.
    pub fn with_function(
        config: AffinityConfig,
        function: Arc<dyn AffinityFunction>,
    ) -> Result<Self> {
        config.validate().map_err(GridError::InvalidConfiguration)?;
        Ok(Self {
            history: Arc::new(AffinityAssignmentHistory::new(config.history_retention)),
            gateway: Arc::new(LifecycleGateway::new()),
            function,
            config,
            sequence: Mutex::new(Sequence::default()),
        })
    }

    pub fn config(&self) -> &AffinityConfig {
        &self.config
    }

    pub fn affinity_function(&self) -> &Arc<dyn AffinityFunction> {
        &self.function
    }

    pub fn history(&self) -> &Arc<AffinityAssignmentHistory> {
        &self.history
    }

    pub fn gateway(&self) -> &Arc<LifecycleGateway> {
        &self.gateway
    }

    /// Opens the gateway to readers and topology updates.
    pub async fn start(&self) -> Result<()> {
        self.gateway.mark_started().await
    }

    /// Stops the gateway; see [`LifecycleGateway::stop`].
    pub async fn shutdown(&self) -> Result<()> {
        self.gateway.stop().await
    }

    /// Returns the version at which processing halted, if it did.
    pub fn halted_at(&self) -> Option<TopologyVersion> {
        self.sequence.lock().ok().and_then(|sequence| sequence.halted_at)
    }

    pub fn is_halted(&self) -> bool {
        self.halted_at().is_some()
    }

    /// Computes and publishes the assignment for a new membership view.
    ///
    /// The view must carry the successor of the last seen version: the next
    /// major with minor 0, or the same major with the next minor. The first
    /// view may carry any version above zero.
    pub async fn apply_membership_change(
        &self,
        event: MembershipEvent,
    ) -> Result<Arc<AffinityAssignment>> {
        let guard = self.gateway.write_lock().await;
        guard.ensure_started()?;
        let applied = self.apply_locked(event);
        guard.unlock();
        applied
    }

    fn apply_locked(&self, event: MembershipEvent) -> Result<Arc<AffinityAssignment>> {
        let span = info_span!(
            "topology.apply",
            version = %event.topology_version,
            members = event.members.len()
        );
        let _enter = span.enter();

        self.admit(event.topology_version)?;

        let previous = match self.history.latest() {
            Ok(previous) => Some(previous),
            Err(GridError::NoAssignmentYet) => None,
            Err(err) => return Err(err),
        };

        let ctx = AffinityContext::new(
            self.config.partition_count,
            self.config.backups,
            &event.members,
        )
        .with_previous(previous.as_deref());
        let owners = self.function.assign_partitions(&ctx)?;
        let assignment = AffinityAssignment::new(event.topology_version, event.members, owners)?;

        if assignment.effective_backups() < self.config.backups as usize {
            event!(
                Level::WARN,
                configured = self.config.backups,
                effective = assignment.effective_backups(),
                "affinity assigned fewer backups than configured"
            );
        }
        let moved = previous
            .as_ref()
            .map(|previous| assignment.primary_changes(previous))
            .unwrap_or(0);

        let published = self.history.publish(assignment)?;
        event!(
            Level::INFO,
            strategy = self.function.name(),
            moved_primaries = moved,
            "topology applied"
        );
        Ok(published)
    }

    /// Order check; halts processing on the first violation.
    fn admit(&self, received: TopologyVersion) -> Result<()> {
        let mut sequence = self.sequence.lock()?;
        if let Some(halted) = sequence.halted_at {
            return Err(GridError::TopologyProcessingHalted(halted));
        }

        let in_order = match sequence.last_seen {
            None => received > TopologyVersion::ZERO,
            Some(last) => last.is_succeeded_by(received),
        };
        if !in_order {
            let last = sequence.last_seen.unwrap_or(TopologyVersion::ZERO);
            sequence.halted_at = Some(received);
            event!(
                Level::ERROR,
                %last,
                %received,
                "out-of-order topology update, halting topology processing"
            );
            return Err(GridError::OutOfOrderTopologyUpdate { last, received });
        }

        sequence.last_seen = Some(received);
        Ok(())
    }

    /// Acquires a read hold on the published assignments.
    pub async fn read(&self) -> Result<AffinityReadGuard<'_>> {
        let gate = self.gateway.read_lock().await?;
        Ok(AffinityReadGuard {
            _gate: gate,
            coordinator: self,
        })
    }

    /// Maps a key to its partition; needs no lock.
    pub fn partition_for_key(&self, key: &[u8]) -> Partition {
        self.function.partition_for_key(key, self.config.partition_count)
    }

    /// Routes `key` against the latest assignment.
    pub async fn route_for(&self, key: &[u8]) -> Result<KeyRoute> {
        self.read().await?.route_for(key)
    }

    /// Owners of `key`'s partition in the latest assignment, primary first.
    pub async fn owners_for_key(&self, key: &[u8]) -> Result<Vec<NodeId>> {
        self.read().await?.owners_for_key(key)
    }

    /// Waits until `version` (or a later one) is published.
    ///
    /// Fails with `IllegalState` if the gateway stops first.
    pub async fn await_version(&self, version: TopologyVersion) -> Result<Arc<AffinityAssignment>> {
        self.gateway.light_check()?;
        tokio::select! {
            published = self.history.wait_for(version) => published,
            _ = self.gateway.wait_for_stop() => Err(GridError::IllegalState(format!(
                "gateway stopped while waiting for topology version {}",
                version
            ))),
        }
    }
}

impl fmt::Debug for TopologyCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopologyCoordinator")
            .field("config", &self.config)
            .field("function", &self.function)
            .field("gateway", &self.gateway)
            .field("last_version", &self.history.last_version())
            .finish()
    }
}

#[async_trait]
impl MembershipListener for TopologyCoordinator {
    async fn on_membership_change(&self, event: MembershipEvent) -> Result<()> {
        self.apply_membership_change(event).await.map(|_| ())
    }
}

/// Read hold on the gateway plus access to the history.
///
/// Assignments obtained here must not outlive the guard unless pinned.
pub struct AffinityReadGuard<'a> {
    _gate: GatewayReadGuard<'a>,
    coordinator: &'a TopologyCoordinator,
}

impl AffinityReadGuard<'_> {
    pub fn latest(&self) -> Result<Arc<AffinityAssignment>> {
        self.coordinator.history.latest()
    }

    pub fn get(&self, version: TopologyVersion) -> Result<Arc<AffinityAssignment>> {
        self.coordinator.history.get(version)
    }

    pub fn latest_at_or_before(&self, version: TopologyVersion) -> Result<Arc<AffinityAssignment>> {
        self.coordinator.history.latest_at_or_before(version)
    }

    /// Pins `version` so it stays readable after this guard is released.
    pub fn pin(&self, version: TopologyVersion) -> Result<PinnedAssignment> {
        self.coordinator.history.pin_guard(version)
    }

    /// Owners of `partition` at `version`.
    pub fn owners_of(&self, version: TopologyVersion, partition: Partition) -> Result<Vec<NodeId>> {
        Ok(self.get(version)?.owners_of(partition)?.to_vec())
    }

    pub fn owners_for_key(&self, key: &[u8]) -> Result<Vec<NodeId>> {
        let partition = self.coordinator.partition_for_key(key);
        Ok(self.latest()?.owners_of(partition)?.to_vec())
    }

    /// Routes `key` against the latest assignment.
    pub fn route_for(&self, key: &[u8]) -> Result<KeyRoute> {
        let assignment = self.latest()?;
        let partition = self.coordinator.partition_for_key(key);
        let owners = assignment.owners_of(partition)?;
        let (primary, backups) = owners.split_first().ok_or_else(|| {
            GridError::InvalidAssignment(format!("Partition {} has no primary owner", partition))
        })?;
        Ok(KeyRoute {
            topology_version: assignment.topology_version(),
            partition,
            primary: primary.clone(),
            backups: backups.to_vec(),
        })
    }

    /// Releases the read hold explicitly.
    pub fn unlock(self) {}
}
