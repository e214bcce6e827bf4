//! Transport-level Tower middleware for the HTTP adapter.
//!
//! Ordering follows the outer-to-inner convention: the first layer listed is
//! the outermost. Request-level concerns (trace ids, stats, timeouts) live in
//! the filter chain, not here.

use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::config::NetworkConfig;

/// The composed Tower layer type produced by [`build_http_layers`].
type HttpLayers = tower::layer::util::Stack<
    RequestBodyLimitLayer,
    tower::layer::util::Stack<
        TraceLayer<
            tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
        >,
        tower::layer::util::Identity,
    >,
>;

/// Builds the HTTP-level Tower middleware stack.
///
/// **Middleware ordering (outermost to innermost):**
/// 1. `Tracing` -- request/response spans at the connection level
/// 2. `RequestBodyLimit` -- rejects bodies over `max_body_bytes` with 413
#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> HttpLayers {
    ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_http_layers_does_not_panic_with_defaults() {
        let _layers = build_http_layers(&NetworkConfig::default());
    }

    #[test]
    fn build_http_layers_with_small_limit() {
        let config = NetworkConfig {
            max_body_bytes: 16,
            ..NetworkConfig::default()
        };
        let _layers = build_http_layers(&config);
    }
}
