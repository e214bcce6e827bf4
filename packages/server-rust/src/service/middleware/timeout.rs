//! Timeout filter.
//!
//! Races the rest of the chain against a deadline and fails with
//! `FailureKind::Timeout` when the deadline wins. The downstream future is
//! dropped on expiry, which cancels it at its next suspension point.

use std::time::Duration;

use async_trait::async_trait;
use trellis_core::Failure;

use crate::protocol::Protocol;
use crate::service::filter::{Filter, Next};

// ---------------------------------------------------------------------------
// TimeoutFilter
// ---------------------------------------------------------------------------

/// Filter enforcing a per-dispatch deadline.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutFilter {
    timeout: Duration,
}

impl TimeoutFilter {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl<P: Protocol> Filter<P> for TimeoutFilter {
    async fn apply(&self, request: P::Request, next: Next<'_, P>) -> Result<P::Response, Failure> {
        match tokio::time::timeout(self.timeout, next.run(request)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(Failure::timeout(self.timeout)),
        }
    }

    fn name(&self) -> &'static str {
        "timeout"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
