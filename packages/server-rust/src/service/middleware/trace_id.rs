//! Trace id assignment.
//!
//! Every dispatch through [`TraceIdFilter`] runs inside a `trace` span whose
//! `trace_id` field is the id carried in `x-trace-id`, so downstream log
//! events are correlated without handlers passing the id around.

use async_trait::async_trait;
use tracing::{info_span, Instrument};
use trellis_core::{Failure, Message};
use uuid::Uuid;

use crate::protocol::Protocol;
use crate::service::filter::{Filter, Next};

pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Ensures every dispatch carries a trace id.
///
/// An incoming `x-trace-id` is kept; otherwise a UUID v4 is assigned. The id
/// is copied onto successful responses, and the rest of the chain runs in a
/// span recording it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceIdFilter;

#[async_trait]
impl<P: Protocol> Filter<P> for TraceIdFilter {
    async fn apply(
        &self,
        mut request: P::Request,
        next: Next<'_, P>,
    ) -> Result<P::Response, Failure> {
        let trace_id = match request.metadata().get(TRACE_ID_HEADER) {
            Some(existing) => existing.to_string(),
            None => {
                let generated = Uuid::new_v4().to_string();
                request
                    .metadata_mut()
                    .insert(TRACE_ID_HEADER, generated.clone());
                generated
            }
        };

        let span = info_span!("trace", trace_id = %trace_id);
        let mut response = next.run(request).instrument(span).await?;
        response.metadata_mut().insert(TRACE_ID_HEADER, trace_id);
        Ok(response)
    }

    fn name(&self) -> &'static str {
        "trace_id"
    }
}
