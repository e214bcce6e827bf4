//! Standard filter library.
//!
//! - [`append_header`]: appends a fixed request metadata value
//! - [`timeout`]: per-dispatch deadline
//! - [`load_shed`]: semaphore-based concurrency limiting
//! - [`stats`]: request counters and latency histograms via `metrics`
//! - [`access_log`]: one `tracing` event per dispatch
//! - [`trace_id`]: trace id assignment and propagation
//! - [`exception_mapping`]: failure-to-response conversion inside the chain
//! - [`acceptlist`]: client id acceptlist
//! - [`pipeline`]: the common filter stack

pub mod acceptlist;
pub mod access_log;
pub mod append_header;
pub mod exception_mapping;
pub mod load_shed;
pub mod pipeline;
pub mod stats;
pub mod timeout;
pub mod trace_id;

pub use acceptlist::{
    ClientIdAcceptlistFilter, CLIENT_ID_HEADER, CLIENT_ID_REJECTED, MISSING_CLIENT_ID,
    UNKNOWN_CLIENT_ID,
};
pub use access_log::AccessLoggingFilter;
pub use append_header::AppendHeaderFilter;
pub use exception_mapping::ExceptionMappingFilter;
pub use load_shed::LoadShedFilter;
pub use pipeline::common_filters;
pub use stats::StatsFilter;
pub use timeout::TimeoutFilter;
pub use trace_id::{TraceIdFilter, TRACE_ID_HEADER};
