// ============================================================================
// Lifecycle Gateway
// ============================================================================
//
// Reader/writer guard plus the lifecycle state machine.
//
// - Readers (assignment lookups) share the lock and require `Started`.
// - Writers (topology application, shutdown) hold it exclusively.
// - The lock is tokio's fair RwLock: a queued writer blocks readers that
//   arrive after it, so sustained read load cannot starve topology updates.
// - Shutdown is announced twice: through registered stop listeners and
//   through a `watch` channel of state transitions.
//
// ============================================================================

use super::listener::{StopListener, StopListenerId};
use super::state::GatewayState;
use crate::core::{GridError, Result};
use log::{debug, error, info};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, watch};

type ListenerMap = HashMap<StopListenerId, Arc<dyn StopListener>>;

fn illegal_state(state: GatewayState) -> GridError {
    GridError::IllegalState(format!(
        "gateway is {}: operation requires the started state",
        state
    ))
}

pub struct LifecycleGateway {
    /// Authoritative state; only changed while the write lock is held.
    lock: RwLock<GatewayState>,
    /// Lock-free mirror of `lock` for `light_check`.
    observed: AtomicU8,
    /// `None` once shutdown has drained the listeners.
    listeners: Mutex<Option<ListenerMap>>,
    transitions: watch::Sender<GatewayState>,
}

/// Shared hold on the gateway; dropping it is the read unlock.
pub struct GatewayReadGuard<'a> {
    guard: RwLockReadGuard<'a, GatewayState>,
}

impl GatewayReadGuard<'_> {
    pub fn state(&self) -> GatewayState {
        *self.guard
    }

    /// Releases the read hold explicitly.
    pub fn unlock(self) {}
}

/// Exclusive hold on the gateway.
pub struct GatewayWriteGuard<'a> {
    guard: RwLockWriteGuard<'a, GatewayState>,
}

impl GatewayWriteGuard<'_> {
    pub fn state(&self) -> GatewayState {
        *self.guard
    }

    /// Fails with `IllegalState` unless the gateway is started.
    pub fn ensure_started(&self) -> Result<()> {
        match *self.guard {
            GatewayState::Started => Ok(()),
            state => Err(illegal_state(state)),
        }
    }

    pub fn unlock(self) {}
}

impl LifecycleGateway {
    /// Creates a gateway in the `Starting` state.
    pub fn new() -> Self {
        let (transitions, _) = watch::channel(GatewayState::Starting);
        Self {
            lock: RwLock::new(GatewayState::Starting),
            observed: AtomicU8::new(GatewayState::Starting.as_u8()),
            listeners: Mutex::new(Some(HashMap::new())),
            transitions,
        }
    }

    /// Point-in-time state, without taking the lock.
    pub fn state(&self) -> GatewayState {
        GatewayState::from_u8(self.observed.load(Ordering::Acquire))
    }

    /// Fails fast when the gateway is not started, without locking.
    pub fn light_check(&self) -> Result<()> {
        match self.state() {
            GatewayState::Started => Ok(()),
            state => Err(illegal_state(state)),
        }
    }

    /// Acquires a shared hold.
    ///
    /// Waits while a writer holds or awaits the lock, then fails with
    /// `IllegalState` unless the gateway is started. On failure the hold is
    /// released before returning.
    pub async fn read_lock(&self) -> Result<GatewayReadGuard<'_>> {
        let guard = self.lock.read().await;
        let state = *guard;
        if state != GatewayState::Started {
            return Err(illegal_state(state));
        }
        Ok(GatewayReadGuard { guard })
    }

    /// Acquires the exclusive hold, waiting for all readers to drain.
    pub async fn write_lock(&self) -> GatewayWriteGuard<'_> {
        GatewayWriteGuard {
            guard: self.lock.write().await,
        }
    }

    /// `Starting` → `Started`.
    pub async fn mark_started(&self) -> Result<()> {
        let mut guard = self.write_lock().await;
        self.transition(&mut guard, GatewayState::Started)
    }

    /// Cooperative shutdown.
    ///
    /// Takes the write lock (so every reader has drained), moves to
    /// `Stopping`, runs each stop listener exactly once, then moves to
    /// `Stopped`. A panicking listener is logged and skipped. Readers queued
    /// behind this call observe `Stopped`.
    pub async fn stop(&self) -> Result<()> {
        let mut guard = self.write_lock().await;
        self.transition(&mut guard, GatewayState::Stopping)?;

        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();
        debug!("Notifying {} stop listeners", listeners.len());
        for (id, listener) in listeners {
            debug!("Running {}", id);
            // A panicking listener must not leave the gateway stuck in `Stopping`.
            if panic::catch_unwind(AssertUnwindSafe(|| listener.on_stop())).is_err() {
                error!("{} panicked during shutdown", id);
            }
        }

        self.transition(&mut guard, GatewayState::Stopped)
    }

    /// Registers a listener to run during `Started` → `Stopping`.
    ///
    /// Fails with `IllegalState` once shutdown has begun.
    pub fn add_stop_listener(&self, listener: Arc<dyn StopListener>) -> Result<StopListenerId> {
        let mut listeners = self.listeners.lock()?;
        let Some(registered) = listeners.as_mut() else {
            return Err(illegal_state(self.state()));
        };
        let id = StopListenerId::new();
        registered.insert(id, listener);
        Ok(id)
    }

    /// Unregisters a listener. Returns true if it was registered.
    pub fn remove_stop_listener(&self, id: StopListenerId) -> bool {
        self.listeners
            .lock()
            .ok()
            .and_then(|mut listeners| listeners.as_mut().map(|map| map.remove(&id).is_some()))
            .unwrap_or(false)
    }

    pub fn stop_listener_count(&self) -> usize {
        self.listeners
            .lock()
            .ok()
            .and_then(|listeners| listeners.as_ref().map(HashMap::len))
            .unwrap_or(0)
    }

    /// Receiver of every state transition; the message-passing shutdown signal.
    pub fn subscribe(&self) -> watch::Receiver<GatewayState> {
        self.transitions.subscribe()
    }

    /// Resolves once shutdown has begun.
    pub async fn wait_for_stop(&self) {
        let mut transitions = self.subscribe();
        // The sender lives as long as `self`, so the channel cannot close here.
        let _ = transitions
            .wait_for(|state| state.is_shutting_down())
            .await;
    }

    fn transition(&self, guard: &mut GatewayWriteGuard<'_>, next: GatewayState) -> Result<()> {
        let current = *guard.guard;
        if !current.can_transition_to(next) {
            return Err(GridError::IllegalState(format!(
                "gateway cannot move from {} to {}",
                current, next
            )));
        }
        *guard.guard = next;
        self.observed.store(next.as_u8(), Ordering::Release);
        self.transitions.send_replace(next);
        info!("Lifecycle gateway {} -> {}", current, next);
        Ok(())
    }
}

impl Default for LifecycleGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LifecycleGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleGateway")
            .field("state", &self.state())
            .field("stop_listeners", &self.stop_listener_count())
            .finish()
    }
}
