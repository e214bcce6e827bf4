//! Server lifecycle state machine with in-flight dispatch tracking.
//!
//! Uses `ArcSwap` for lock-free state reads, compare-and-swap for
//! transitions, a `watch` channel to publish every transition, and an atomic
//! counter with RAII guards for in-flight tracking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;
use trellis_core::Failure;

use crate::service::warmup::WarmupError;

// ---------------------------------------------------------------------------
// LifecycleState
// ---------------------------------------------------------------------------

/// Server lifecycle state.
///
/// ```text
/// Unconfigured -> Configuring -> WarmingUp -> Ready -> ShuttingDown -> Stopped
///                      |              |
///                      +--> Failed <--+
/// ```
///
/// `Configuring -> ShuttingDown` is also legal, for servers abandoned before
/// warmup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Unconfigured,
    /// Filters, routes and exception mappers may be registered.
    Configuring,
    /// Resources are acquired and warmup traffic is running.
    WarmingUp,
    /// Accepting dispatches.
    Ready,
    /// Rejecting new dispatches and draining in-flight ones.
    ShuttingDown,
    Stopped,
    /// Startup failed; terminal.
    Failed,
}

impl LifecycleState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Configuring => "configuring",
            Self::WarmingUp => "warming_up",
            Self::Ready => "ready",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    /// True if `self -> next` is an edge of the state machine.
    #[must_use]
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::{
            Configuring, Failed, Ready, ShuttingDown, Stopped, Unconfigured, WarmingUp,
        };
        matches!(
            (self, next),
            (Unconfigured, Configuring)
                | (Configuring, WarmingUp | Failed | ShuttingDown)
                | (WarmingUp, Ready | Failed)
                | (Ready, ShuttingDown)
                | (ShuttingDown, Stopped)
        )
    }

    /// True for `Stopped` and `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// LifecycleError
// ---------------------------------------------------------------------------

/// Errors raised while driving the server through its lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("illegal lifecycle transition from {from} to {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("configuration failed: {0}")]
    Configuration(#[from] Failure),

    #[error(transparent)]
    Warmup(#[from] WarmupError),

    #[error("resource lifecycle failed: {0:#}")]
    Resource(anyhow::Error),
}

// ---------------------------------------------------------------------------
// LifecycleController
// ---------------------------------------------------------------------------

/// Owns the lifecycle state and tracks in-flight dispatches.
///
/// The controller coordinates the server and its transport:
/// 1. The server drives transitions with [`transition`](Self::transition)
/// 2. Transports and readiness probes read [`state`](Self::state) or watch
///    [`subscribe`](Self::subscribe)
/// 3. Each dispatch holds an [`InFlightGuard`]
/// 4. `wait_for_drain()` blocks shutdown until in-flight dispatches complete
#[derive(Debug)]
pub struct LifecycleController {
    state: ArcSwap<LifecycleState>,
    notifier: watch::Sender<LifecycleState>,
    in_flight: Arc<AtomicU64>,
}

impl LifecycleController {
    /// Creates a controller in the `Unconfigured` state.
    #[must_use]
    pub fn new() -> Self {
        let (notifier, _rx) = watch::channel(LifecycleState::Unconfigured);
        Self {
            state: ArcSwap::from_pointee(LifecycleState::Unconfigured),
            notifier,
            in_flight: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    /// Returns a receiver notified on every transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.notifier.subscribe()
    }

    /// Moves `from -> to` atomically.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if `from -> to` is not an edge of the state
    /// machine, or if the current state is not `from` (including when a
    /// concurrent caller won the race).
    pub fn transition(
        &self,
        from: LifecycleState,
        to: LifecycleState,
    ) -> Result<(), LifecycleError> {
        if !from.can_transition_to(to) {
            return Err(LifecycleError::InvalidTransition { from, to });
        }

        let current = self.state.load();
        if **current != from {
            return Err(LifecycleError::InvalidTransition {
                from: **current,
                to,
            });
        }
        let previous = self.state.compare_and_swap(&*current, Arc::new(to));
        if !Arc::ptr_eq(&*previous, &*current) {
            return Err(LifecycleError::InvalidTransition {
                from: **previous,
                to,
            });
        }

        info!(from = %from, to = %to, "lifecycle transition");
        // Receivers may have been dropped.
        let _ = self.notifier.send(to);
        Ok(())
    }

    /// Creates an RAII guard that tracks an in-flight dispatch.
    ///
    /// The counter is decremented when the guard drops, including during
    /// unwinding and when the dispatch future is cancelled.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Waits for all in-flight dispatches to complete, up to `timeout`.
    ///
    /// Returns `true` if everything drained, `false` if the timeout expired.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Acquire) == 0 {
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            // Poll at 10ms intervals to avoid busy-waiting
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::LifecycleState::{
        Configuring, Failed, Ready, ShuttingDown, Stopped, Unconfigured, WarmingUp,
    };
    use super::*;

    fn ready_controller() -> LifecycleController {
        let controller = LifecycleController::new();
        controller.transition(Unconfigured, Configuring).unwrap();
        controller.transition(Configuring, WarmingUp).unwrap();
        controller.transition(WarmingUp, Ready).unwrap();
        controller
    }

    #[test]
    fn initial_state_is_unconfigured() {
        let controller = LifecycleController::new();
        assert_eq!(controller.state(), Unconfigured);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[test]
    fn happy_path_transitions() {
        let controller = ready_controller();
        controller.transition(Ready, ShuttingDown).unwrap();
        controller.transition(ShuttingDown, Stopped).unwrap();
        assert_eq!(controller.state(), Stopped);
        assert!(controller.state().is_terminal());
    }

    #[test]
    fn illegal_edges_are_rejected() {
        let controller = LifecycleController::new();
        let err = controller.transition(Unconfigured, Ready).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition {
                from: Unconfigured,
                to: Ready
            }
        ));
        assert_eq!(controller.state(), Unconfigured);

        assert!(!Ready.can_transition_to(Configuring));
        assert!(!Stopped.can_transition_to(Configuring));
        assert!(!Failed.can_transition_to(Ready));
        assert!(WarmingUp.can_transition_to(Failed));
    }

    #[test]
    fn transition_from_wrong_state_reports_actual_state() {
        let controller = ready_controller();
        let err = controller.transition(Configuring, WarmingUp).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition {
                from: Ready,
                to: WarmingUp
            }
        ));
    }

    #[test]
    fn only_one_concurrent_transition_wins() {
        let controller = Arc::new(ready_controller());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let controller = Arc::clone(&controller);
                std::thread::spawn(move || controller.transition(Ready, ShuttingDown).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(controller.state(), ShuttingDown);
    }

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let controller = LifecycleController::new();
        let mut rx = controller.subscribe();
        assert_eq!(*rx.borrow(), Unconfigured);

        controller.transition(Unconfigured, Configuring).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Configuring);
    }

    #[test]
    fn in_flight_guard_increments_and_decrements() {
        let controller = LifecycleController::new();
        let guard1 = controller.in_flight_guard();
        let guard2 = controller.in_flight_guard();
        assert_eq!(controller.in_flight_count(), 2);

        drop(guard1);
        assert_eq!(controller.in_flight_count(), 1);
        drop(guard2);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn wait_for_drain_with_active_dispatches() {
        let controller = ready_controller();
        let guard = controller.in_flight_guard();

        let guard_handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        assert!(controller.wait_for_drain(Duration::from_secs(2)).await);
        guard_handle.await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_drain_timeout() {
        let controller = ready_controller();
        let _guard = controller.in_flight_guard();
        assert!(!controller.wait_for_drain(Duration::from_millis(50)).await);
    }
}
