use memogrid::{
    AffinityAssignment, AffinityAssignmentHistory, GridError, NodeId, TopologyVersion, node_ids,
};
use std::sync::Arc;

fn view() -> Vec<NodeId> {
    node_ids(["node-a", "node-b"]).unwrap()
}

fn assignment(major: u64) -> AffinityAssignment {
    let [a, b] = [view()[0].clone(), view()[1].clone()];
    AffinityAssignment::new(
        TopologyVersion::from(major),
        view(),
        vec![vec![a.clone(), b.clone()], vec![b, a]],
    )
    .unwrap()
}

fn v(major: u64) -> TopologyVersion {
    TopologyVersion::from(major)
}

#[test]
fn retention_window_evicts_oldest_versions() {
    let history = AffinityAssignmentHistory::new(10);
    for major in 1..=12 {
        history.publish(assignment(major)).unwrap();
    }

    assert_eq!(history.get(v(1)), Err(GridError::VersionNotFound(v(1))));
    assert_eq!(history.get(v(2)), Err(GridError::VersionNotFound(v(2))));
    for major in 3..=12 {
        assert_eq!(history.get(v(major)).unwrap().topology_version(), v(major));
    }
    assert_eq!(history.len(), 10);
    assert_eq!(history.latest().unwrap().topology_version(), v(12));
}

#[test]
fn pinned_version_survives_eviction_until_unpinned() {
    let history = AffinityAssignmentHistory::new(10);
    history.publish(assignment(1)).unwrap();
    history.publish(assignment(2)).unwrap();
    history.pin(v(2)).unwrap();

    for major in 3..=12 {
        history.publish(assignment(major)).unwrap();
    }

    assert!(matches!(history.get(v(1)), Err(GridError::VersionNotFound(_))));
    assert!(history.get(v(2)).is_ok());
    assert_eq!(history.len(), 11);

    history.unpin(v(2)).unwrap();
    assert!(matches!(history.get(v(2)), Err(GridError::VersionNotFound(_))));
    assert_eq!(history.len(), 10);
    assert_eq!(history.unpin(v(2)), Err(GridError::NotPinned(v(2))));
}

#[test]
fn pins_are_reference_counted() {
    let history = Arc::new(AffinityAssignmentHistory::new(1));
    history.publish(assignment(1)).unwrap();

    let guard = history.pin_guard(v(1)).unwrap();
    history.pin(v(1)).unwrap();
    assert_eq!(history.pin_count(v(1)), 2);

    history.publish(assignment(2)).unwrap();
    drop(guard);
    assert!(history.get(v(1)).is_ok());

    history.unpin(v(1)).unwrap();
    assert!(history.get(v(1)).is_err());
    assert_eq!(history.versions().unwrap(), vec![v(2)]);
}

#[test]
fn publish_rejects_stale_versions() {
    let history = AffinityAssignmentHistory::new(4);
    history.publish(assignment(5)).unwrap();

    for stale in [5, 3] {
        assert_eq!(
            history.publish(assignment(stale)),
            Err(GridError::OutOfOrderTopologyUpdate {
                last: v(5),
                received: v(stale),
            })
        );
    }
    assert_eq!(history.versions().unwrap(), vec![v(5)]);
}

#[test]
fn lookups_before_first_publish() {
    let history = AffinityAssignmentHistory::new(4);
    assert_eq!(history.latest(), Err(GridError::NoAssignmentYet));
    assert!(history.is_empty());
    assert_eq!(history.last_version(), None);
    assert!(matches!(history.pin(v(1)), Err(GridError::VersionNotFound(_))));
}

#[test]
fn stale_lookup_retry_path_uses_latest() {
    let history = AffinityAssignmentHistory::new(2);
    for major in [2, 4, 6] {
        history.publish(assignment(major)).unwrap();
    }

    let requested = v(2);
    let resolved = match history.get(requested) {
        Err(GridError::VersionNotFound(_)) => history.latest().unwrap(),
        other => other.unwrap(),
    };
    assert_eq!(resolved.topology_version(), v(6));
    assert_eq!(
        history.latest_at_or_before(v(5)).unwrap().topology_version(),
        v(4)
    );
    assert!(history.latest_at_or_before(v(3)).is_err());
}

#[tokio::test]
async fn waiters_wake_on_publish() {
    let history = Arc::new(AffinityAssignmentHistory::new(4));
    let waiter = {
        let history = Arc::clone(&history);
        tokio::spawn(async move { history.wait_for(v(2)).await })
    };

    history.publish(assignment(1)).unwrap();
    history.publish(assignment(2)).unwrap();

    let published = waiter.await.unwrap().unwrap();
    assert_eq!(published.topology_version(), v(2));
}
