//! Standard filter stack.

use super::access_log::AccessLoggingFilter;
use super::exception_mapping::ExceptionMappingFilter;
use super::stats::StatsFilter;
use super::trace_id::TraceIdFilter;
use crate::protocol::Protocol;
use crate::service::exceptions::ExceptionMappers;
use crate::service::filter::FilterChain;

/// The filters most servers register globally.
///
/// Order (outermost to innermost):
/// 1. `TraceIdFilter` -- assign the trace id before anything logs
/// 2. `AccessLoggingFilter` -- one event per dispatch, mapped outcome included
/// 3. `StatsFilter` -- count and time the mapped outcome
/// 4. `ExceptionMappingFilter` -- turn failures into responses
#[must_use]
pub fn common_filters<P: Protocol>(mappers: &ExceptionMappers<P>) -> FilterChain<P> {
    FilterChain::new()
        .and_then(TraceIdFilter)
        .and_then(AccessLoggingFilter)
        .and_then(StatsFilter)
        .and_then(ExceptionMappingFilter::new(mappers.clone()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
