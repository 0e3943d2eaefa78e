use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Callback run once when the gateway enters `Stopping`.
///
/// Invoked under the gateway write lock. Implementations must be idempotent
/// and must not call back into the gateway's locking operations: the callback
/// is synchronous, so it cannot await a lock, and blocking on one from here
/// deadlocks. Non-blocking calls such as `state()` and `light_check()` are fine.
pub trait StopListener: Send + Sync {
    fn on_stop(&self);
}

impl<F> StopListener for F
where
    F: Fn() + Send + Sync,
{
    fn on_stop(&self) {
        self()
    }
}

/// Identity of a registered stop listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StopListenerId(Uuid);

impl StopListenerId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for StopListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stop_listener_{}", self.0)
    }
}
