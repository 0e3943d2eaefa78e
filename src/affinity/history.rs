// ============================================================================
// Affinity Assignment History
// ============================================================================
//
// Bounded, append-only store of assignments keyed by topology version.
//
// Retention keeps the newest `retention_limit` versions. Older versions are
// evicted unless pinned; a pinned version stays until its last unpin, on top
// of the retention window.
//
// ============================================================================

use super::assignment::AffinityAssignment;
use crate::core::{GridError, Result, TopologyVersion};
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct HistoryInner {
    entries: BTreeMap<TopologyVersion, Arc<AffinityAssignment>>,
    pins: HashMap<TopologyVersion, usize>,
    last_version: Option<TopologyVersion>,
}

impl HistoryInner {
    /// Removes unpinned versions older than the newest `limit` ones.
    fn evict(&mut self, limit: usize) -> Vec<TopologyVersion> {
        if self.entries.len() <= limit {
            return Vec::new();
        }
        let Some(window_start) = self.entries.keys().rev().nth(limit - 1).copied() else {
            return Vec::new();
        };

        let evictable: Vec<TopologyVersion> = self
            .entries
            .range(..window_start)
            .map(|(version, _)| *version)
            .filter(|version| !self.pins.contains_key(version))
            .collect();
        for version in &evictable {
            self.entries.remove(version);
        }
        evictable
    }
}

/// Versioned store of published assignments.
#[derive(Debug)]
pub struct AffinityAssignmentHistory {
    retention_limit: usize,
    inner: RwLock<HistoryInner>,
    published: watch::Sender<TopologyVersion>,
}

impl AffinityAssignmentHistory {
    /// Creates a history keeping `retention_limit` versions (at least one).
    pub fn new(retention_limit: usize) -> Self {
        let (published, _) = watch::channel(TopologyVersion::ZERO);
        Self {
            retention_limit: retention_limit.max(1),
            inner: RwLock::new(HistoryInner::default()),
            published,
        }
    }

    pub fn retention_limit(&self) -> usize {
        self.retention_limit
    }

    /// Appends an assignment.
    ///
    /// The version must be strictly greater than the last published one.
    pub fn publish(&self, assignment: AffinityAssignment) -> Result<Arc<AffinityAssignment>> {
        let version = assignment.topology_version();
        let assignment = Arc::new(assignment);
        let evicted = {
            let mut inner = self.inner.write()?;
            if let Some(last) = inner.last_version
                && version <= last
            {
                return Err(GridError::OutOfOrderTopologyUpdate {
                    last,
                    received: version,
                });
            }
            inner.entries.insert(version, Arc::clone(&assignment));
            inner.last_version = Some(version);
            inner.evict(self.retention_limit)
        };

        if !evicted.is_empty() {
            debug!("Evicted affinity versions {:?} after publishing {}", evicted, version);
        }
        self.published.send_replace(version);
        Ok(assignment)
    }

    /// Exact lookup.
    ///
    /// `VersionNotFound` means the version is too old (or never existed):
    /// refresh with [`latest`](Self::latest) and retry.
    pub fn get(&self, version: TopologyVersion) -> Result<Arc<AffinityAssignment>> {
        let inner = self.inner.read()?;
        inner
            .entries
            .get(&version)
            .cloned()
            .ok_or(GridError::VersionNotFound(version))
    }

    /// Most recently published assignment.
    pub fn latest(&self) -> Result<Arc<AffinityAssignment>> {
        let inner = self.inner.read()?;
        inner
            .entries
            .last_key_value()
            .map(|(_, assignment)| Arc::clone(assignment))
            .ok_or(GridError::NoAssignmentYet)
    }

    /// Newest retained assignment with version `<= version`.
    pub fn latest_at_or_before(&self, version: TopologyVersion) -> Result<Arc<AffinityAssignment>> {
        let inner = self.inner.read()?;
        inner
            .entries
            .range(..=version)
            .next_back()
            .map(|(_, assignment)| Arc::clone(assignment))
            .ok_or(GridError::VersionNotFound(version))
    }

    /// Protects `version` from eviction; reference counted.
    pub fn pin(&self, version: TopologyVersion) -> Result<Arc<AffinityAssignment>> {
        let mut inner = self.inner.write()?;
        let assignment = inner
            .entries
            .get(&version)
            .cloned()
            .ok_or(GridError::VersionNotFound(version))?;
        *inner.pins.entry(version).or_insert(0) += 1;
        Ok(assignment)
    }

    /// Releases one pin; the last release makes the version evictable again.
    pub fn unpin(&self, version: TopologyVersion) -> Result<()> {
        let evicted = {
            let mut inner = self.inner.write()?;
            let Some(count) = inner.pins.get_mut(&version) else {
                return Err(GridError::NotPinned(version));
            };
            *count -= 1;
            if *count > 0 {
                return Ok(());
            }
            inner.pins.remove(&version);
            inner.evict(self.retention_limit)
        };

        if !evicted.is_empty() {
            debug!("Evicted affinity versions {:?} after unpinning {}", evicted, version);
        }
        Ok(())
    }

    /// Pins `version` for the lifetime of the returned guard.
    pub fn pin_guard(self: &Arc<Self>, version: TopologyVersion) -> Result<PinnedAssignment> {
        let assignment = self.pin(version)?;
        Ok(PinnedAssignment {
            history: Arc::clone(self),
            assignment,
        })
    }

    /// Waits until a version `>= version` is published, then returns the
    /// latest assignment.
    pub async fn wait_for(&self, version: TopologyVersion) -> Result<Arc<AffinityAssignment>> {
        let mut published = self.published.subscribe();
        published
            .wait_for(|current| *current >= version)
            .await
            .map_err(|_| GridError::IllegalState("assignment history dropped".to_string()))?;
        self.latest()
    }

    pub fn last_version(&self) -> Option<TopologyVersion> {
        self.inner.read().ok().and_then(|inner| inner.last_version)
    }

    /// Retained versions, oldest first.
    pub fn versions(&self) -> Result<Vec<TopologyVersion>> {
        Ok(self.inner.read()?.entries.keys().copied().collect())
    }

    pub fn pin_count(&self, version: TopologyVersion) -> usize {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.pins.get(&version).copied())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A pinned assignment; the pin is released on drop.
#[derive(Debug)]
pub struct PinnedAssignment {
    history: Arc<AffinityAssignmentHistory>,
    assignment: Arc<AffinityAssignment>,
}

impl PinnedAssignment {
    pub fn assignment(&self) -> &Arc<AffinityAssignment> {
        &self.assignment
    }
}

impl Deref for PinnedAssignment {
    type Target = AffinityAssignment;

    fn deref(&self) -> &Self::Target {
        &self.assignment
    }
}

impl Drop for PinnedAssignment {
    fn drop(&mut self) {
        let version = self.assignment.topology_version();
        if let Err(err) = self.history.unpin(version) {
            warn!("Failed to release pin on affinity version {}: {}", version, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{NodeId, node_ids};

    fn assignment(major: u64) -> AffinityAssignment {
        let members: Vec<NodeId> = node_ids(["a", "b"]).unwrap();
        AffinityAssignment::new(
            TopologyVersion::new(major, 0),
            members.clone(),
            vec![members.clone(), vec![members[1].clone(), members[0].clone()]],
        )
        .unwrap()
    }

    #[test]
    fn latest_before_first_publish_fails() {
        let history = AffinityAssignmentHistory::new(4);
        assert_eq!(history.latest().err(), Some(GridError::NoAssignmentYet));
        assert!(history.is_empty());
        assert_eq!(history.last_version(), None);
    }

    #[test]
    fn retention_window_evicts_oldest() {
        let history = AffinityAssignmentHistory::new(3);
        for major in 1..=5 {
            history.publish(assignment(major)).unwrap();
        }
        assert_eq!(
            history.versions().unwrap(),
            vec![
                TopologyVersion::new(3, 0),
                TopologyVersion::new(4, 0),
                TopologyVersion::new(5, 0)
            ]
        );
        assert_eq!(
            history.latest().unwrap().topology_version(),
            TopologyVersion::new(5, 0)
        );
    }

    #[test]
    fn latest_at_or_before_finds_floor() {
        let history = AffinityAssignmentHistory::new(10);
        history.publish(assignment(2)).unwrap();
        history.publish(assignment(5)).unwrap();

        let floor = history
            .latest_at_or_before(TopologyVersion::new(4, 3))
            .unwrap();
        assert_eq!(floor.topology_version(), TopologyVersion::new(2, 0));
        assert!(matches!(
            history.latest_at_or_before(TopologyVersion::new(1, 0)),
            Err(GridError::VersionNotFound(_))
        ));
    }

    #[test]
    fn pins_are_reference_counted() {
        let history = AffinityAssignmentHistory::new(1);
        history.publish(assignment(1)).unwrap();
        let v1 = TopologyVersion::new(1, 0);
        history.pin(v1).unwrap();
        history.pin(v1).unwrap();
        assert_eq!(history.pin_count(v1), 2);

        history.publish(assignment(2)).unwrap();
        history.unpin(v1).unwrap();
        assert!(history.get(v1).is_ok());

        history.unpin(v1).unwrap();
        assert!(matches!(history.get(v1), Err(GridError::VersionNotFound(_))));
        assert_eq!(history.unpin(v1).err(), Some(GridError::NotPinned(v1)));
    }

    #[test]
    fn pin_guard_releases_on_drop() {
        let history = Arc::new(AffinityAssignmentHistory::new(1));
        history.publish(assignment(1)).unwrap();
        let v1 = TopologyVersion::new(1, 0);
        {
            let pinned = history.pin_guard(v1).unwrap();
            history.publish(assignment(2)).unwrap();
            assert_eq!(pinned.partition_count(), 2);
            assert!(history.get(v1).is_ok());
        }
        assert_eq!(history.pin_count(v1), 0);
        assert!(history.get(v1).is_err());
    }

    #[test]
    fn wait_for_resolves_after_publish() {
        let history = Arc::new(AffinityAssignmentHistory::new(4));
        let waiter = Arc::clone(&history);
        tokio_test::block_on(async move {
            let pending =
                tokio::spawn(async move { waiter.wait_for(TopologyVersion::new(2, 0)).await });
            history.publish(assignment(1)).unwrap();
            history.publish(assignment(2)).unwrap();
            let resolved = pending.await.unwrap().unwrap();
            assert_eq!(resolved.topology_version(), TopologyVersion::new(2, 0));
        });
    }
}
