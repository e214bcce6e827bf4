//! Stats filter.
//!
//! Records dispatch count and latency through the `metrics` facade. No
//! exporter is installed by this crate; without one the calls are no-ops.

use std::time::Instant;

use async_trait::async_trait;
use trellis_core::Failure;

use crate::protocol::Protocol;
use crate::service::filter::{Filter, Next};

pub const REQUESTS_TOTAL: &str = "trellis_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "trellis_request_duration_seconds";

// ---------------------------------------------------------------------------
// StatsFilter
// ---------------------------------------------------------------------------

/// Counts dispatches by protocol and outcome and records their duration.
///
/// The outcome label is the protocol's response label (status code, reply
/// type) on success and the failure kind otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsFilter;

#[async_trait]
impl<P: Protocol> Filter<P> for StatsFilter {
    async fn apply(&self, request: P::Request, next: Next<'_, P>) -> Result<P::Response, Failure> {
        let start = Instant::now();
        let result = next.run(request).await;
        let elapsed = start.elapsed();

        let outcome = match &result {
            Ok(response) => P::response_label(response).into_owned(),
            Err(failure) => failure.kind().as_str().to_string(),
        };
        metrics::counter!(REQUESTS_TOTAL, "protocol" => P::NAME, "outcome" => outcome)
            .increment(1);
        metrics::histogram!(REQUEST_DURATION_SECONDS, "protocol" => P::NAME)
            .record(elapsed.as_secs_f64());

        result
    }

    fn name(&self) -> &'static str {
        "stats"
    }
}
