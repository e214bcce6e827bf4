//! Transport side of the server: listen configuration, lifecycle state, and
//! the axum HTTP adapter.

pub mod config;
pub mod handlers;
pub mod lifecycle;
pub mod middleware;
pub mod module;

pub use config::NetworkConfig;
pub use handlers::AppState;
pub use lifecycle::{InFlightGuard, LifecycleController, LifecycleError, LifecycleState};
pub use module::HttpTransport;
