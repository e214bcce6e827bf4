//! Access logging filter: one structured `tracing` event per dispatch.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, info_span, Instrument};
use trellis_core::Failure;

use crate::protocol::Protocol;
use crate::service::filter::{Filter, Next};

/// Wraps the rest of the chain in a `dispatch` span and logs the outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessLoggingFilter;

#[async_trait]
impl<P: Protocol> Filter<P> for AccessLoggingFilter {
    async fn apply(&self, request: P::Request, next: Next<'_, P>) -> Result<P::Response, Failure> {
        let description = P::describe(&request);
        let span = info_span!(
            "dispatch",
            protocol = P::NAME,
            request = %description,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let start = Instant::now();
        let result = next.run(request).instrument(span.clone()).await;

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = start.elapsed().as_millis() as u64;
        let outcome = match &result {
            Ok(response) => P::response_label(response).into_owned(),
            Err(failure) => failure.kind().as_str().to_string(),
        };
        span.record("duration_ms", duration_ms);
        span.record("outcome", outcome.as_str());

        span.in_scope(|| {
            info!(
                protocol = P::NAME,
                request = %description,
                duration_ms,
                outcome = %outcome,
                "dispatch complete"
            );
        });

        result
    }

    fn name(&self) -> &'static str {
        "access_logging"
    }
}

#[cfg(test)]
mod tests {
    use trellis_core::{HttpRequest, HttpResponse};

    use super::*;
    use crate::protocol::Http;
    use crate::service::filter::FilterChain;
    use crate::service::handler::{service_fn, Service};

    #[tokio::test]
    async fn access_logging_passes_through_response() {
        let svc = FilterChain::<Http>::new()
            .and_then(AccessLoggingFilter)
            .into_service(service_fn(|_req: HttpRequest| async {
                Ok::<_, Failure>(HttpResponse::new(http::StatusCode::CREATED))
            }));

        let resp = svc.call(HttpRequest::post("/items")).await.unwrap();
        assert_eq!(resp.status, http::StatusCode::CREATED);
    }
}
