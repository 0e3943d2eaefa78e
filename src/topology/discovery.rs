use super::membership::{
    ClusterMembership, MembershipEvent, MembershipEventKind, MembershipListener,
};
use crate::core::{GridError, NodeId, Result, TopologyVersion};
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct DiscoveryState {
    membership: ClusterMembership,
    version: TopologyVersion,
    listeners: Vec<Arc<dyn MembershipListener>>,
}

/// An in-process discovery service for tests and embedded clusters.
///
/// Every change bumps the topology version and is delivered to each listener
/// before the next change is accepted, so listeners see a gap-free,
/// strictly increasing sequence.
#[derive(Clone, Default)]
pub struct InMemoryDiscovery {
    state: Arc<Mutex<DiscoveryState>>,
}

impl InMemoryDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for all subsequent events.
    pub async fn register_listener(&self, listener: Arc<dyn MembershipListener>) {
        self.state.lock().await.listeners.push(listener);
    }

    /// Publishes the initial view with all `nodes` at once.
    pub async fn bootstrap<I, S>(&self, nodes: I) -> Result<TopologyVersion>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock().await;
        if state.version != TopologyVersion::ZERO {
            return Err(GridError::IllegalState(format!(
                "discovery already published version {}",
                state.version
            )));
        }
        let membership = ClusterMembership::new(nodes)?;
        if membership.is_empty() {
            return Err(GridError::EmptyTopology);
        }
        state.membership = membership;
        let version = state.version.next_major();
        Self::deliver(&mut state, version, MembershipEventKind::Initial).await
    }

    /// A node joins the cluster.
    pub async fn join(&self, node_id: impl Into<String>) -> Result<TopologyVersion> {
        let node = NodeId::new(node_id)?;
        let mut state = self.state.lock().await;
        if !state.membership.add_node(node.as_str())? {
            return Err(GridError::DuplicateMember(node.to_string()));
        }
        let version = state.version.next_major();
        Self::deliver(&mut state, version, MembershipEventKind::NodeJoined(node)).await
    }

    /// A node leaves the cluster gracefully.
    pub async fn leave(&self, node_id: &str) -> Result<TopologyVersion> {
        let mut state = self.state.lock().await;
        let node = Self::remove(&mut state, node_id)?;
        let version = state.version.next_major();
        Self::deliver(&mut state, version, MembershipEventKind::NodeLeft(node)).await
    }

    /// A node is detected as failed.
    pub async fn fail(&self, node_id: &str) -> Result<TopologyVersion> {
        let mut state = self.state.lock().await;
        let node = Self::remove(&mut state, node_id)?;
        let version = state.version.next_major();
        Self::deliver(&mut state, version, MembershipEventKind::NodeFailed(node)).await
    }

    /// Republishes the current members under the next minor version.
    pub async fn minor_change(&self) -> Result<TopologyVersion> {
        let mut state = self.state.lock().await;
        if state.version == TopologyVersion::ZERO {
            return Err(GridError::IllegalState(
                "no membership view has been published".to_string(),
            ));
        }
        let version = state.version.next_minor();
        Self::deliver(&mut state, version, MembershipEventKind::MetadataChanged).await
    }

    pub async fn current_version(&self) -> TopologyVersion {
        self.state.lock().await.version
    }

    pub async fn members(&self) -> Vec<NodeId> {
        self.state.lock().await.membership.all_nodes()
    }

    fn remove(state: &mut DiscoveryState, node_id: &str) -> Result<NodeId> {
        if !state.membership.remove_node(node_id) {
            return Err(GridError::IllegalState(format!(
                "node '{}' is not a cluster member",
                node_id
            )));
        }
        NodeId::new(node_id)
    }

    /// Delivers one event to every listener while the state lock is held.
    ///
    /// The version advances even if a listener rejects the event. The first
    /// listener error is returned after all listeners have been called.
    async fn deliver(
        state: &mut DiscoveryState,
        version: TopologyVersion,
        kind: MembershipEventKind,
    ) -> Result<TopologyVersion> {
        state.version = version;
        let event = MembershipEvent::new(version, state.membership.all_nodes()).with_kind(kind);
        debug!(
            "Delivering topology {} ({} members) to {} listeners",
            version,
            event.members.len(),
            state.listeners.len()
        );

        let mut first_error = None;
        for listener in &state.listeners {
            if let Err(err) = listener.on_membership_change(event.clone()).await {
                warn!("Membership listener rejected topology {}: {}", version, err);
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(version),
        }
    }
}
