//! Load-shedding filter.
//!
//! Rejects dispatches with `FailureKind::Overloaded` when the number of
//! concurrent dispatches passing through the filter reaches its limit.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use trellis_core::Failure;

use crate::protocol::Protocol;
use crate::service::filter::{Filter, Next};

// ---------------------------------------------------------------------------
// LoadShedFilter
// ---------------------------------------------------------------------------

/// Filter that limits concurrent dispatches via a semaphore.
///
/// When all permits are taken, incoming dispatches are rejected immediately
/// rather than queued.
#[derive(Debug, Clone)]
pub struct LoadShedFilter {
    semaphore: Arc<Semaphore>,
}

impl LoadShedFilter {
    /// Create a new `LoadShedFilter` with the given concurrency limit.
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Permits currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait]
impl<P: Protocol> Filter<P> for LoadShedFilter {
    async fn apply(&self, request: P::Request, next: Next<'_, P>) -> Result<P::Response, Failure> {
        let Ok(_permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
            return Err(Failure::overloaded());
        };
        // Held until the downstream chain finishes or is dropped.
        next.run(request).await
    }

    fn name(&self) -> &'static str {
        "load_shed"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
