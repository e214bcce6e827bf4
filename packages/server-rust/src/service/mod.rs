//! Request handling core: services, filters, routing, exception mapping,
//! warmup and the server lifecycle.
//!
//! 1. **Services** (`handler`): the unary async request -> response contract
//! 2. **Filters** (`filter`, `middleware`): ordered, short-circuiting wrappers
//! 3. **Routing** (`matcher`, `router`): matcher -> composed service bindings
//! 4. **Exception mapping** (`exceptions`): failure -> response backstop
//! 5. **Warmup** (`warmup`): synthetic traffic through the frozen pipeline
//! 6. **Lifecycle** (`server`, `registry`, `config`): startup and shutdown

pub mod config;
pub mod exceptions;
pub mod filter;
pub mod handler;
pub mod matcher;
pub mod middleware;
pub mod registry;
pub mod router;
pub mod server;
pub mod warmup;

// Re-export key types for convenient access.
pub use config::{Flags, ServerConfig};
pub use exceptions::{
    http_defaults, mapper_fn, thrift_defaults, ExceptionMapper, ExceptionMappers, MapperFn,
};
pub use filter::{Filter, FilterChain, FilteredService, Next};
pub use handler::{service_fn, Service, ServiceFn};
pub use matcher::{HttpMatcher, PathPattern, ThriftMatcher};
pub use registry::{Resource, ResourceContext, ResourceRegistry};
pub use router::{Binding, Controller, Route, Router, RouterBuilder};
pub use server::{Application, Dispatcher, Server};
pub use warmup::{WarmupError, WarmupReport, WarmupRunner, WarmupSample, WarmupSource};
