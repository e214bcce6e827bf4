//! In-chain failure mapping.
//!
//! [`ExceptionMappingFilter`] resolves failures through the server's
//! [`ExceptionMappers`] at its position in the chain, which lets the filters
//! in front of it (stats, access logging) record the mapped status.

use async_trait::async_trait;
use tracing::debug;
use trellis_core::Failure;

use crate::protocol::Protocol;
use crate::service::exceptions::ExceptionMappers;
use crate::service::filter::{Filter, Next};

/// Converts downstream failures into responses through the mapper registry.
///
/// Filters placed before this one only ever observe `Ok` responses for
/// failures raised after it.
pub struct ExceptionMappingFilter<P: Protocol> {
    mappers: ExceptionMappers<P>,
}

impl<P: Protocol> ExceptionMappingFilter<P> {
    #[must_use]
    pub fn new(mappers: ExceptionMappers<P>) -> Self {
        Self { mappers }
    }
}

impl<P: Protocol> Clone for ExceptionMappingFilter<P> {
    fn clone(&self) -> Self {
        Self {
            mappers: self.mappers.clone(),
        }
    }
}

#[async_trait]
impl<P: Protocol> Filter<P> for ExceptionMappingFilter<P> {
    async fn apply(&self, request: P::Request, next: Next<'_, P>) -> Result<P::Response, Failure> {
        match next.run(request).await {
            Ok(response) => Ok(response),
            Err(failure) => {
                debug!(protocol = P::NAME, kind = %failure.kind(), "mapping failure to response");
                Ok(self.mappers.resolve(&failure))
            }
        }
    }

    fn name(&self) -> &'static str {
        "exception_mapping"
    }
}
