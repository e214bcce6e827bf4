//! axum handlers for the HTTP transport.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports the handler functions used to build the
//! router.

pub mod dispatch;
pub mod health;

pub use dispatch::dispatch_handler;
pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use super::NetworkConfig;
use crate::protocol::Http;
use crate::service::Server;

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// The server every non-probe request is dispatched to.
    pub server: Arc<Server<Http>>,
    pub config: Arc<NetworkConfig>,
    /// Transport start time, used for uptime calculation.
    pub start_time: Instant,
}
