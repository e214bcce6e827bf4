//! Request routing: matches a request to exactly one binding and invokes the
//! binding's composed service.
//!
//! Routing tables are assembled with a [`RouterBuilder`] during configuration
//! and frozen into an immutable [`Router`] by [`RouterBuilder::build`]. The
//! frozen router is shared across concurrent dispatches without locking.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use http::Method;
use trellis_core::Failure;

use super::filter::{Filter, FilterChain, FilteredService};
use super::handler::Service;
use super::matcher::{HttpMatcher, ThriftMatcher};
use crate::protocol::{Http, MatchRank, Protocol, RouteMatcher, Thrift};

// ---------------------------------------------------------------------------
// Route / Controller
// ---------------------------------------------------------------------------

/// A matcher paired with its terminal handler, before any filters are applied.
pub struct Route<P: Protocol> {
    matcher: P::Matcher,
    handler: Arc<dyn Service<P>>,
}

impl<P: Protocol> Route<P> {
    pub fn new(matcher: P::Matcher, handler: impl Service<P> + 'static) -> Self {
        Self {
            matcher,
            handler: Arc::new(handler),
        }
    }

    #[must_use]
    pub fn matcher(&self) -> &P::Matcher {
        &self.matcher
    }
}

impl<P: Protocol> fmt::Debug for Route<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("matcher", &self.matcher)
            .finish_non_exhaustive()
    }
}

/// A group of routes registered together.
///
/// Controllers are constructed by the application and handed over fully
/// built; the router never constructs them.
pub trait Controller<P: Protocol>: Send + Sync {
    /// The routes this controller serves.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` failure if a route cannot be described
    /// (for example an invalid path pattern).
    fn routes(&self) -> Result<Vec<Route<P>>, Failure>;
}

// ---------------------------------------------------------------------------
// RouterBuilder
// ---------------------------------------------------------------------------

struct PendingBinding<P: Protocol> {
    matcher: P::Matcher,
    /// Global filters in force when the route was added, then its own.
    filters: FilterChain<P>,
    handler: Arc<dyn Service<P>>,
}

/// Configuration-time routing table.
///
/// A binding runs the global filters registered before it was added, ahead
/// of its own filters. Global filters added later only reach later routes.
/// Route conflicts are rejected as soon as the offending route is added.
pub struct RouterBuilder<P: Protocol> {
    global: FilterChain<P>,
    bindings: Vec<PendingBinding<P>>,
}

impl<P: Protocol> RouterBuilder<P> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            global: FilterChain::new(),
            bindings: Vec::new(),
        }
    }

    /// Appends a global filter for routes added from now on.
    pub fn filter(&mut self, filter: impl Filter<P> + 'static) -> &mut Self {
        self.global.push(Arc::new(filter));
        self
    }

    /// Appends a shared global filter instance.
    pub fn filter_arc(&mut self, filter: Arc<dyn Filter<P>>) -> &mut Self {
        self.global.push(filter);
        self
    }

    /// Appends every stage of `chain` to the global filters.
    pub fn filters(&mut self, chain: &FilterChain<P>) -> &mut Self {
        self.global.extend(chain);
        self
    }

    /// Adds a binding with no route-specific filters.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` failure if `matcher` conflicts with an
    /// existing binding.
    pub fn add(
        &mut self,
        matcher: P::Matcher,
        handler: impl Service<P> + 'static,
    ) -> Result<&mut Self, Failure> {
        self.add_route(Route::new(matcher, handler), FilterChain::new())
    }

    /// Adds a binding whose handler is wrapped by `filters` (after the
    /// global filters).
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` failure if `matcher` conflicts with an
    /// existing binding.
    pub fn add_filtered(
        &mut self,
        matcher: P::Matcher,
        filters: FilterChain<P>,
        handler: impl Service<P> + 'static,
    ) -> Result<&mut Self, Failure> {
        self.add_route(Route::new(matcher, handler), filters)
    }

    /// Adds a prepared route with its route-specific filters.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` failure if the route conflicts with an
    /// existing binding.
    pub fn add_route(
        &mut self,
        route: Route<P>,
        filters: FilterChain<P>,
    ) -> Result<&mut Self, Failure> {
        if let Some(existing) = self
            .bindings
            .iter()
            .find(|binding| binding.matcher.conflicts_with(&route.matcher))
        {
            return Err(Failure::configuration(format!(
                "route `{}` conflicts with already registered route `{}`",
                route.matcher, existing.matcher
            )));
        }

        let mut chain = self.global.clone();
        chain.extend(&filters);
        self.bindings.push(PendingBinding {
            matcher: route.matcher,
            filters: chain,
            handler: route.handler,
        });
        Ok(self)
    }

    /// Adds every route of `controller`; only global filters apply.
    ///
    /// # Errors
    ///
    /// Returns the controller's failure, or a `Configuration` failure on the
    /// first conflicting route.
    pub fn add_controller(&mut self, controller: &dyn Controller<P>) -> Result<&mut Self, Failure> {
        self.add_controller_filtered(FilterChain::new(), controller)
    }

    /// Adds every route of `controller`, each wrapped by `filters`.
    ///
    /// # Errors
    ///
    /// Returns the controller's failure, or a `Configuration` failure on the
    /// first conflicting route.
    pub fn add_controller_filtered(
        &mut self,
        filters: FilterChain<P>,
        controller: &dyn Controller<P>,
    ) -> Result<&mut Self, Failure> {
        for route in controller.routes()? {
            self.add_route(route, filters.clone())?;
        }
        Ok(self)
    }

    /// Number of bindings added so far.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn global_filter_names(&self) -> Vec<&'static str> {
        self.global.names()
    }

    /// Freezes the table, composing each binding's filters around its
    /// handler.
    #[must_use]
    pub fn build(self) -> Router<P> {
        let bindings = self
            .bindings
            .into_iter()
            .map(|pending| Binding {
                matcher: pending.matcher,
                service: pending.filters.into_service_arc(pending.handler),
            })
            .collect();
        Router { bindings }
    }
}

impl<P: Protocol> Default for RouterBuilder<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterBuilder<Http> {
    /// # Errors
    ///
    /// Returns a `Configuration` failure for an invalid or conflicting pattern.
    pub fn route(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl Service<Http> + 'static,
    ) -> Result<&mut Self, Failure> {
        self.add(HttpMatcher::new(method, pattern)?, handler)
    }

    /// # Errors
    ///
    /// Returns a `Configuration` failure for an invalid or conflicting pattern.
    pub fn route_filtered(
        &mut self,
        method: Method,
        pattern: &str,
        filters: FilterChain<Http>,
        handler: impl Service<Http> + 'static,
    ) -> Result<&mut Self, Failure> {
        self.add_filtered(HttpMatcher::new(method, pattern)?, filters, handler)
    }

    /// # Errors
    ///
    /// Returns a `Configuration` failure for an invalid or conflicting pattern.
    pub fn get(
        &mut self,
        pattern: &str,
        handler: impl Service<Http> + 'static,
    ) -> Result<&mut Self, Failure> {
        self.route(Method::GET, pattern, handler)
    }

    /// # Errors
    ///
    /// Returns a `Configuration` failure for an invalid or conflicting pattern.
    pub fn post(
        &mut self,
        pattern: &str,
        handler: impl Service<Http> + 'static,
    ) -> Result<&mut Self, Failure> {
        self.route(Method::POST, pattern, handler)
    }

    /// # Errors
    ///
    /// Returns a `Configuration` failure for an invalid or conflicting pattern.
    pub fn put(
        &mut self,
        pattern: &str,
        handler: impl Service<Http> + 'static,
    ) -> Result<&mut Self, Failure> {
        self.route(Method::PUT, pattern, handler)
    }

    /// # Errors
    ///
    /// Returns a `Configuration` failure for an invalid or conflicting pattern.
    pub fn delete(
        &mut self,
        pattern: &str,
        handler: impl Service<Http> + 'static,
    ) -> Result<&mut Self, Failure> {
        self.route(Method::DELETE, pattern, handler)
    }
}

impl RouterBuilder<Thrift> {
    /// # Errors
    ///
    /// Returns a `Configuration` failure for an empty or duplicate method name.
    pub fn method(
        &mut self,
        name: &str,
        handler: impl Service<Thrift> + 'static,
    ) -> Result<&mut Self, Failure> {
        self.add(ThriftMatcher::new(name)?, handler)
    }

    /// # Errors
    ///
    /// Returns a `Configuration` failure for an empty or duplicate method name.
    pub fn method_filtered(
        &mut self,
        name: &str,
        filters: FilterChain<Thrift>,
        handler: impl Service<Thrift> + 'static,
    ) -> Result<&mut Self, Failure> {
        self.add_filtered(ThriftMatcher::new(name)?, filters, handler)
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// A frozen `(matcher, composed service)` pair.
pub struct Binding<P: Protocol> {
    matcher: P::Matcher,
    service: FilteredService<P>,
}

impl<P: Protocol> Binding<P> {
    #[must_use]
    pub fn matcher(&self) -> &P::Matcher {
        &self.matcher
    }

    #[must_use]
    pub fn service(&self) -> &FilteredService<P> {
        &self.service
    }
}

/// Immutable routing table.
///
/// Selection is deterministic: an exact match wins over pattern matches, and
/// among candidates of equal rank the earliest registered binding wins.
pub struct Router<P: Protocol> {
    bindings: Vec<Binding<P>>,
}

impl<P: Protocol> Router<P> {
    /// Finds the binding that would serve `request`.
    #[must_use]
    pub fn route(&self, request: &P::Request) -> Option<&Binding<P>> {
        let mut first_pattern = None;
        for binding in &self.bindings {
            match binding.matcher.rank(request) {
                Some(MatchRank::Exact) => return Some(binding),
                Some(MatchRank::Pattern) if first_pattern.is_none() => {
                    first_pattern = Some(binding);
                }
                _ => {}
            }
        }
        first_pattern
    }

    /// Dispatches `request` to its binding.
    ///
    /// # Errors
    ///
    /// Returns a `RouteNotFound` failure if no binding accepts the request, or
    /// whatever failure the binding's filter chain surfaces.
    pub async fn dispatch(&self, mut request: P::Request) -> Result<P::Response, Failure> {
        let Some(binding) = self.route(&request) else {
            return Err(Failure::route_not_found(P::describe(&request)));
        };
        binding.matcher.bind(&mut request);
        binding.service.call(request).await
    }

    #[must_use]
    pub fn bindings(&self) -> &[Binding<P>] {
        &self.bindings
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

#[async_trait]
impl<P: Protocol> Service<P> for Router<P> {
    async fn call(&self, request: P::Request) -> Result<P::Response, Failure> {
        self.dispatch(request).await
    }
}

impl<P: Protocol> fmt::Debug for Router<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.bindings.iter().map(|b| b.matcher.to_string()))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use tokio::sync::Notify;
    use trellis_core::{FailureKind, HttpRequest, HttpResponse, ThriftRequest, ThriftResponse};

    use super::*;
    use crate::service::handler::service_fn;
    use crate::service::middleware::AppendHeaderFilter;

    fn text(body: &'static str) -> impl Service<Http> {
        service_fn(move |_req: HttpRequest| async move {
            Ok::<_, Failure>(HttpResponse::ok().with_body(body))
        })
    }

    /// Echoes the joined value of the `test` header as a response header.
    fn echo_test_header() -> impl Service<Http> {
        service_fn(|req: HttpRequest| async move {
            let value = req.metadata.joined("test").unwrap_or_default();
            Ok::<_, Failure>(HttpResponse::ok().with_header("test", value))
        })
    }

    struct ReadHeadersController;

    impl Controller<Http> for ReadHeadersController {
        fn routes(&self) -> Result<Vec<Route<Http>>, Failure> {
            Ok(vec![Route::new(
                HttpMatcher::new(Method::GET, "/read-headers")?,
                echo_test_header(),
            )])
        }
    }

    #[tokio::test]
    async fn global_then_route_filters_preserve_header_order() {
        let mut builder = RouterBuilder::<Http>::new();
        builder.filter(AppendHeaderFilter::new("test", "1"));
        builder
            .add_controller_filtered(
                FilterChain::new().and_then(AppendHeaderFilter::new("test", "2")),
                &ReadHeadersController,
            )
            .unwrap();
        builder.get("/plain", echo_test_header()).unwrap();
        let router = builder.build();

        let resp = router.dispatch(HttpRequest::get("/read-headers")).await.unwrap();
        assert_eq!(resp.metadata.get("test"), Some("1,2"));

        // A route registered without filters only sees the global chain.
        let resp = router.dispatch(HttpRequest::get("/plain")).await.unwrap();
        assert_eq!(resp.metadata.get("test"), Some("1"));
    }

    #[tokio::test]
    async fn global_filters_reach_only_routes_added_after_them() {
        let mut builder = RouterBuilder::<Http>::new();
        builder.get("/early", echo_test_header()).unwrap();
        builder.filter(AppendHeaderFilter::new("test", "late"));
        builder.get("/after", echo_test_header()).unwrap();
        let router = builder.build();

        let early = router.dispatch(HttpRequest::get("/early")).await.unwrap();
        assert_eq!(early.metadata.get("test"), Some(""));
        assert!(router.bindings()[0].service().filter_names().is_empty());

        let after = router.dispatch(HttpRequest::get("/after")).await.unwrap();
        assert_eq!(after.metadata.get("test"), Some("late"));
        assert_eq!(router.bindings()[1].service().filter_names(), vec!["append_header"]);
    }

    #[test]
    fn duplicate_matcher_fails_at_configuration_time() {
        let mut builder = RouterBuilder::<Http>::new();
        builder.get("/foo", text("a")).unwrap();
        let err = builder.get("/foo", text("b")).err().unwrap();
        assert_eq!(err.kind(), FailureKind::Configuration);
        assert_eq!(builder.route_count(), 1);
    }

    #[test]
    fn same_path_different_method_is_not_a_conflict() {
        let mut builder = RouterBuilder::<Http>::new();
        builder.get("/foo", text("get")).unwrap();
        builder.post("/foo", text("post")).unwrap();
        assert_eq!(builder.build().len(), 2);
    }

    #[tokio::test]
    async fn exact_match_beats_earlier_pattern() {
        let mut builder = RouterBuilder::<Http>::new();
        builder.get("/users/:id", text("pattern")).unwrap();
        builder.get("/users/me", text("exact")).unwrap();
        let router = builder.build();

        let resp = router.dispatch(HttpRequest::get("/users/me")).await.unwrap();
        assert_eq!(resp.body_text(), "exact");
        let resp = router.dispatch(HttpRequest::get("/users/42")).await.unwrap();
        assert_eq!(resp.body_text(), "pattern");
    }

    #[tokio::test]
    async fn first_registered_pattern_wins_ties() {
        let mut builder = RouterBuilder::<Http>::new();
        builder.get("/a/:x", text("first")).unwrap();
        builder.get("/:y/b", text("second")).unwrap();
        let router = builder.build();

        let resp = router.dispatch(HttpRequest::get("/a/b")).await.unwrap();
        assert_eq!(resp.body_text(), "first");
    }

    #[tokio::test]
    async fn params_reach_the_handler() {
        let mut builder = RouterBuilder::<Http>::new();
        builder
            .get(
                "/users/:id",
                service_fn(|req: HttpRequest| async move {
                    let id = req.param("id").unwrap_or_default().to_string();
                    Ok::<_, Failure>(HttpResponse::ok().with_body(id))
                }),
            )
            .unwrap();
        let router = builder.build();

        let resp = router.dispatch(HttpRequest::get("/users/17")).await.unwrap();
        assert_eq!(resp.body_text(), "17");
    }

    #[tokio::test]
    async fn unmatched_request_is_route_not_found() {
        let router = RouterBuilder::<Http>::new().build();
        let err = router.dispatch(HttpRequest::get("/nope")).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::RouteNotFound);
        assert_eq!(err.message(), "no route for GET /nope");
    }

    #[tokio::test]
    async fn unmatched_request_runs_no_filters() {
        let counter = Arc::new(AtomicU32::new(0));
        struct Count(Arc<AtomicU32>);

        #[async_trait::async_trait]
        impl Filter<Http> for Count {
            async fn apply(
                &self,
                request: HttpRequest,
                next: crate::service::filter::Next<'_, Http>,
            ) -> Result<HttpResponse, Failure> {
                self.0.fetch_add(1, Ordering::SeqCst);
                next.run(request).await
            }
        }

        let mut builder = RouterBuilder::<Http>::new();
        builder.filter(Count(Arc::clone(&counter)));
        builder.get("/known", text("ok")).unwrap();
        let router = builder.build();

        assert!(router.dispatch(HttpRequest::get("/unknown")).await.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn same_request_twice_yields_equal_responses() {
        let mut builder = RouterBuilder::<Http>::new();
        builder.filter(AppendHeaderFilter::new("test", "1"));
        builder.get("/echo", echo_test_header()).unwrap();
        let router = builder.build();

        let request = HttpRequest::get("/echo");
        let first = router.dispatch(request.clone()).await.unwrap();
        let second = router.dispatch(request).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn suspended_dispatch_does_not_block_others() {
        let gate = Arc::new(Notify::new());
        let mut builder = RouterBuilder::<Http>::new();
        let slow_gate = Arc::clone(&gate);
        builder
            .get(
                "/slow",
                service_fn(move |_req: HttpRequest| {
                    let gate = Arc::clone(&slow_gate);
                    async move {
                        gate.notified().await;
                        Ok::<_, Failure>(HttpResponse::ok().with_body("slow"))
                    }
                }),
            )
            .unwrap();
        builder.get("/fast", text("fast")).unwrap();
        let router = Arc::new(builder.build());

        let slow = tokio::spawn({
            let router = Arc::clone(&router);
            async move { router.dispatch(HttpRequest::get("/slow")).await }
        });

        let fast = tokio::time::timeout(
            Duration::from_secs(1),
            router.dispatch(HttpRequest::get("/fast")),
        )
        .await
        .expect("fast dispatch must not wait for the slow one")
        .unwrap();
        assert_eq!(fast.body_text(), "fast");

        gate.notify_one();
        let slow = slow.await.unwrap().unwrap();
        assert_eq!(slow.body_text(), "slow");
    }

    #[tokio::test]
    async fn thrift_routes_by_method_name() {
        let mut builder = RouterBuilder::<Thrift>::new();
        builder
            .method(
                "echo",
                service_fn(|req: ThriftRequest| async move {
                    Ok::<_, Failure>(ThriftResponse::success(req.args))
                }),
            )
            .unwrap();
        assert!(builder
            .method("echo", service_fn(|_req: ThriftRequest| async {
                Ok::<_, Failure>(ThriftResponse::success(&b""[..]))
            }))
            .is_err());
        let router = builder.build();

        let resp = router
            .dispatch(ThriftRequest::new("echo").with_args(&b"hi"[..]))
            .await
            .unwrap();
        assert_eq!(resp.reply, trellis_core::ThriftReply::Success((&b"hi"[..]).into()));

        let err = router.dispatch(ThriftRequest::new("nope")).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::RouteNotFound);
    }
}
