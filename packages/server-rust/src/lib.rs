//! Trellis server: protocol-agnostic request handling core.
//!
//! Applications assemble ordered [`Filter`](service::Filter) chains around
//! terminal [`Service`](service::Service)s, bind them to matchers in a
//! [`Router`](service::Router), register exception mappers that turn
//! failures into responses, and let a [`Server`](service::Server) drive
//! warmup and the lifecycle. The same core serves the HTTP-style
//! ([`Http`]) and RPC-style ([`Thrift`]) protocols; [`network`] carries the
//! axum HTTP adapter.

pub mod network;
pub mod protocol;
pub mod service;
pub mod telemetry;

pub use network::{HttpTransport, LifecycleError, LifecycleState, NetworkConfig};
pub use protocol::{Http, MatchRank, Protocol, RouteMatcher, Thrift};
pub use service::{
    Application, ExceptionMappers, Filter, FilterChain, Flags, Router, RouterBuilder, Server,
    ServerConfig, Service,
};
pub use trellis_core::{AppKind, Failure, FailureKind};
