//! The `Service` contract: a unary async transformation from request to
//! response-or-failure.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use trellis_core::Failure;

use crate::protocol::Protocol;

/// Terminal or composed request handler.
///
/// Implementations must tolerate concurrent calls from independent
/// dispatches; `call` takes `&self` and any mutable state must be
/// synchronised by the implementation. A service has no knowledge of the
/// filters wrapping it.
#[async_trait]
pub trait Service<P: Protocol>: Send + Sync {
    async fn call(&self, request: P::Request) -> Result<P::Response, Failure>;
}

#[async_trait]
impl<P, S> Service<P> for Arc<S>
where
    P: Protocol,
    S: Service<P> + ?Sized,
{
    async fn call(&self, request: P::Request) -> Result<P::Response, Failure> {
        (**self).call(request).await
    }
}

// ---------------------------------------------------------------------------
// service_fn
// ---------------------------------------------------------------------------

/// Service backed by an async closure. Built with [`service_fn`].
#[derive(Clone)]
pub struct ServiceFn<F> {
    f: F,
}

/// Wraps an async closure as a [`Service`].
///
/// ```
/// use trellis_core::{Failure, HttpRequest, HttpResponse};
/// use trellis_server::service::service_fn;
///
/// let hello = service_fn(|_req: HttpRequest| async {
///     Ok::<_, Failure>(HttpResponse::ok().with_body("hello"))
/// });
/// # let _ = hello;
/// ```
pub fn service_fn<F>(f: F) -> ServiceFn<F> {
    ServiceFn { f }
}

#[async_trait]
impl<P, F, Fut> Service<P> for ServiceFn<F>
where
    P: Protocol,
    F: Fn(P::Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<P::Response, Failure>> + Send,
{
    async fn call(&self, request: P::Request) -> Result<P::Response, Failure> {
        (self.f)(request).await
    }
}
