//! Server lifecycle orchestration.
//!
//! A [`Server`] owns the routing table, the exception mapper registry, the
//! managed resources and the lifecycle state. Startup runs in a fixed order:
//! filters, service filters, routes, exception mappers, then
//! [`warmup`](Server::warmup), which freezes the configuration, acquires
//! resources, runs warmup traffic and only then reports `Ready`.
//!
//! Service filters wrap the frozen router as a whole, so they see every
//! dispatch (unrouted requests included) while global filters only run for
//! requests that matched a binding.

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use trellis_core::Failure;

use super::config::ServerConfig;
use super::exceptions::ExceptionMappers;
use super::filter::{FilterChain, FilteredService};
use super::handler::Service;
use super::registry::{Resource, ResourceContext, ResourceRegistry};
use super::router::{Router, RouterBuilder};
use super::warmup::{WarmupReport, WarmupRunner, WarmupSource};
use crate::network::{LifecycleController, LifecycleError, LifecycleState};
use crate::protocol::Protocol;

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Application hooks invoked by [`Server::bootstrap`], in declaration order.
pub trait Application<P: Protocol>: Send + Sync {
    /// Global filters, outermost first.
    fn configure_filters(
        &self,
        _filters: &mut FilterChain<P>,
        _mappers: &ExceptionMappers<P>,
    ) -> Result<(), Failure> {
        Ok(())
    }

    /// Filters wrapped around the whole router, outermost first. They run
    /// for every dispatch, before routing.
    fn configure_service(
        &self,
        _service: &mut FilterChain<P>,
        _mappers: &ExceptionMappers<P>,
    ) -> Result<(), Failure> {
        Ok(())
    }

    fn configure_routes(
        &self,
        router: &mut RouterBuilder<P>,
        config: &ServerConfig,
    ) -> Result<(), Failure>;

    fn configure_exception_mappers(&self, _mappers: &ExceptionMappers<P>) -> Result<(), Failure> {
        Ok(())
    }

    fn configure_resources(&self, _resources: &ResourceRegistry) -> Result<(), Failure> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct Server<P: Protocol> {
    config: Arc<ServerConfig>,
    lifecycle: Arc<LifecycleController>,
    /// Present while configuring; taken when the table is frozen.
    builder: Mutex<Option<RouterBuilder<P>>>,
    /// Service filters collected while configuring.
    service_filters: Mutex<FilterChain<P>>,
    router: ArcSwapOption<Router<P>>,
    /// Service filters around the frozen router; what `handle` and warmup call.
    pipeline: ArcSwapOption<FilteredService<P>>,
    mappers: ExceptionMappers<P>,
    resources: ResourceRegistry,
}

impl<P: Protocol> Server<P> {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            lifecycle: Arc::new(LifecycleController::new()),
            builder: Mutex::new(Some(RouterBuilder::new())),
            service_filters: Mutex::new(FilterChain::new()),
            router: ArcSwapOption::empty(),
            pipeline: ArcSwapOption::empty(),
            mappers: ExceptionMappers::new(),
            resources: ResourceRegistry::new(),
        }
    }

    /// Builds, configures and warms up a server from `app`.
    ///
    /// # Errors
    ///
    /// Returns the first configuration failure (the server ends `Failed`),
    /// a resource acquisition error, or the warmup error.
    pub async fn bootstrap<A, W>(
        config: ServerConfig,
        app: &A,
        warmup: &W,
    ) -> Result<Arc<Self>, LifecycleError>
    where
        A: Application<P> + ?Sized,
        W: WarmupSource<P> + ?Sized,
    {
        let server = Arc::new(Self::new(config));
        info!(server = %server.config.name, protocol = P::NAME, "bootstrapping server");
        server.begin_configuring()?;

        let configured = server
            .configure_filters(|filters, mappers| app.configure_filters(filters, mappers))
            .and_then(|()| {
                server.configure_service(|service, mappers| app.configure_service(service, mappers))
            })
            .and_then(|()| {
                server.configure_routes(|router| app.configure_routes(router, &server.config))
            })
            .and_then(|()| server.configure_exception_mappers(|m| app.configure_exception_mappers(m)))
            .and_then(|()| server.configure_resources(|r| app.configure_resources(r)));

        if let Err(failure) = configured {
            error!(server = %server.config.name, error = %failure, "server configuration failed");
            server
                .lifecycle
                .transition(LifecycleState::Configuring, LifecycleState::Failed)?;
            return Err(failure.into());
        }

        server.warmup(warmup).await?;
        Ok(server)
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Receiver notified on every lifecycle transition.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    #[must_use]
    pub fn lifecycle(&self) -> Arc<LifecycleController> {
        Arc::clone(&self.lifecycle)
    }

    /// Shared handle to the exception mapper registry.
    #[must_use]
    pub fn mappers(&self) -> &ExceptionMappers<P> {
        &self.mappers
    }

    #[must_use]
    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    /// The frozen routing table, once warmup has started.
    #[must_use]
    pub fn router(&self) -> Option<Arc<Router<P>>> {
        self.router.load_full()
    }

    /// Tower handle onto [`handle`](Self::handle).
    #[must_use]
    pub fn dispatcher(self: &Arc<Self>) -> Dispatcher<P> {
        Dispatcher {
            server: Arc::clone(self),
        }
    }

    // -- configuration ------------------------------------------------------

    /// `Unconfigured -> Configuring`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the server is not `Unconfigured`.
    pub fn begin_configuring(&self) -> Result<(), LifecycleError> {
        self.lifecycle
            .transition(LifecycleState::Unconfigured, LifecycleState::Configuring)
    }

    fn ensure_configuring(&self, what: &str) -> Result<(), Failure> {
        let state = self.state();
        if state == LifecycleState::Configuring {
            Ok(())
        } else {
            Err(Failure::configuration(format!(
                "cannot configure {what} while the server is {state}"
            )))
        }
    }

    fn with_builder<R>(
        &self,
        what: &str,
        f: impl FnOnce(&mut RouterBuilder<P>) -> Result<R, Failure>,
    ) -> Result<R, Failure> {
        self.ensure_configuring(what)?;
        let mut guard = self.builder.lock();
        let builder = guard.as_mut().ok_or_else(|| {
            Failure::configuration(format!("cannot configure {what}: routing table is frozen"))
        })?;
        f(builder)
    }

    /// Appends global filters.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` failure outside `Configuring`, or the
    /// closure's failure (in which case no filter is added).
    pub fn configure_filters<F>(&self, f: F) -> Result<(), Failure>
    where
        F: FnOnce(&mut FilterChain<P>, &ExceptionMappers<P>) -> Result<(), Failure>,
    {
        self.with_builder("filters", |builder| {
            let mut chain = FilterChain::new();
            f(&mut chain, &self.mappers)?;
            debug!(filters = ?chain.names(), "registering global filters");
            builder.filters(&chain);
            Ok(())
        })
    }

    /// Appends service filters, which wrap the router as a whole.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` failure outside `Configuring`, or the
    /// closure's failure (in which case no filter is added).
    pub fn configure_service<F>(&self, f: F) -> Result<(), Failure>
    where
        F: FnOnce(&mut FilterChain<P>, &ExceptionMappers<P>) -> Result<(), Failure>,
    {
        self.ensure_configuring("service filters")?;
        let mut chain = FilterChain::new();
        f(&mut chain, &self.mappers)?;
        debug!(filters = ?chain.names(), "registering service filters");
        self.service_filters.lock().extend(&chain);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns a `Configuration` failure outside `Configuring`, or the
    /// closure's failure.
    pub fn configure_routes<F>(&self, f: F) -> Result<(), Failure>
    where
        F: FnOnce(&mut RouterBuilder<P>) -> Result<(), Failure>,
    {
        self.with_builder("routes", f)
    }

    /// # Errors
    ///
    /// Returns a `Configuration` failure outside `Configuring`, or the
    /// closure's failure.
    pub fn configure_exception_mappers<F>(&self, f: F) -> Result<(), Failure>
    where
        F: FnOnce(&ExceptionMappers<P>) -> Result<(), Failure>,
    {
        self.ensure_configuring("exception mappers")?;
        f(&self.mappers)
    }

    /// # Errors
    ///
    /// Returns a `Configuration` failure outside `Configuring`, or the
    /// closure's failure.
    pub fn configure_resources<F>(&self, f: F) -> Result<(), Failure>
    where
        F: FnOnce(&ResourceRegistry) -> Result<(), Failure>,
    {
        self.ensure_configuring("resources")?;
        f(&self.resources)
    }

    /// Registers a resource acquired before warmup and released at shutdown.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` failure outside `Configuring` or for a
    /// duplicate resource name.
    pub fn manage<T: Resource>(&self, resource: T) -> Result<(), Failure> {
        self.ensure_configuring("resources")?;
        self.resources.register(resource)
    }

    // -- startup ------------------------------------------------------------

    /// `Configuring -> WarmingUp -> Ready`.
    ///
    /// Freezes the routing table, seals the exception mappers, acquires
    /// resources and dispatches the warmup samples through the service
    /// filters and the frozen table.
    /// On failure the server ends `Failed` with its resources released.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the server is not `Configuring`, a
    /// resource error, or the warmup error.
    pub async fn warmup<W>(&self, source: &W) -> Result<WarmupReport, LifecycleError>
    where
        W: WarmupSource<P> + ?Sized,
    {
        self.lifecycle
            .transition(LifecycleState::Configuring, LifecycleState::WarmingUp)?;

        let builder = self.builder.lock().take().unwrap_or_default();
        let router = Arc::new(builder.build());
        self.mappers.seal();
        self.router.store(Some(Arc::clone(&router)));
        let service_filters = std::mem::take(&mut *self.service_filters.lock());
        let terminal: Arc<dyn Service<P>> = router.clone();
        let pipeline = Arc::new(service_filters.into_service_arc(terminal));
        self.pipeline.store(Some(Arc::clone(&pipeline)));
        info!(
            server = %self.config.name,
            routes = router.len(),
            mappers = self.mappers.len(),
            "configuration frozen"
        );

        let ctx = ResourceContext {
            config: Arc::clone(&self.config),
        };
        if let Err(e) = self.resources.acquire_all(&ctx).await {
            self.fail_startup().await;
            return Err(LifecycleError::Resource(e));
        }

        let runner = WarmupRunner::new(self.config.warmup_iterations);
        match runner.run(&*pipeline, source).await {
            Ok(report) => {
                self.lifecycle
                    .transition(LifecycleState::WarmingUp, LifecycleState::Ready)?;
                info!(server = %self.config.name, "server ready");
                Ok(report)
            }
            Err(e) => {
                self.fail_startup().await;
                Err(e.into())
            }
        }
    }

    async fn fail_startup(&self) {
        if let Err(e) = self.resources.release_all().await {
            warn!(error = %e, "resource release failed after startup failure");
        }
        if let Err(e) = self
            .lifecycle
            .transition(LifecycleState::WarmingUp, LifecycleState::Failed)
        {
            warn!(error = %e, "could not mark server as failed");
        }
    }

    // -- dispatch -----------------------------------------------------------

    /// Dispatches one request and always produces a response.
    ///
    /// Outside `Ready` the protocol's unavailable response is returned
    /// without touching the routing table. Failures that leave the filter
    /// chain are resolved through the exception mappers.
    pub async fn handle(&self, request: P::Request) -> P::Response {
        // Take the guard before re-checking the state so shutdown either sees
        // this dispatch in flight or this dispatch sees the shutdown.
        let _in_flight = self.lifecycle.in_flight_guard();
        if self.state() != LifecycleState::Ready {
            debug!(protocol = P::NAME, state = %self.state(), "rejecting request, server not ready");
            return P::unavailable_response();
        }
        let Some(pipeline) = self.pipeline.load_full() else {
            return P::unavailable_response();
        };

        match pipeline.call(request).await {
            Ok(response) => response,
            Err(failure) => self.mappers.resolve(&failure),
        }
    }

    /// Like [`handle`](Self::handle), but abandons the dispatch when `cancel`
    /// fires and resolves a `Cancelled` failure instead.
    ///
    /// The abandoned chain is dropped at its current suspension point, so
    /// only drop-time cleanup runs in the filters.
    pub async fn handle_cancellable(
        &self,
        request: P::Request,
        cancel: &CancellationToken,
    ) -> P::Response {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(protocol = P::NAME, "dispatch cancelled by transport");
                self.mappers.resolve(&Failure::cancelled())
            }
            response = self.handle(request) => response,
        }
    }

    // -- shutdown -----------------------------------------------------------

    /// `Ready -> ShuttingDown -> Stopped`.
    ///
    /// New dispatches are refused immediately; in-flight ones get up to
    /// `drain_timeout`. Resources are released whether or not the drain
    /// completed. Returns whether everything drained.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the server is neither `Ready` nor
    /// `Configuring`, or the first resource release error (after reaching
    /// `Stopped`).
    pub async fn shutdown(&self, drain_timeout: Duration) -> Result<bool, LifecycleError> {
        self.lifecycle
            .transition(self.state(), LifecycleState::ShuttingDown)?;

        let drained = self.lifecycle.wait_for_drain(drain_timeout).await;
        if drained {
            info!(server = %self.config.name, "all in-flight requests drained");
        } else {
            warn!(
                server = %self.config.name,
                in_flight = self.lifecycle.in_flight_count(),
                "drain timeout expired with in-flight requests remaining"
            );
        }

        let released = self.resources.release_all().await;
        self.lifecycle
            .transition(LifecycleState::ShuttingDown, LifecycleState::Stopped)?;
        released.map_err(LifecycleError::Resource)?;
        info!(server = %self.config.name, "server stopped");
        Ok(drained)
    }
}

impl<P: Protocol> fmt::Debug for Server<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.config.name)
            .field("protocol", &P::NAME)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Dispatcher (tower adapter)
// ---------------------------------------------------------------------------

/// `tower::Service` handle onto a server, so the dispatch path composes with
/// tower layers and transports. Never fails: failures are already mapped.
pub struct Dispatcher<P: Protocol> {
    server: Arc<Server<P>>,
}

impl<P: Protocol> Clone for Dispatcher<P> {
    fn clone(&self) -> Self {
        Self {
            server: Arc::clone(&self.server),
        }
    }
}

impl<P: Protocol> tower::Service<P::Request> for Dispatcher<P> {
    type Response = P::Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<P::Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: P::Request) -> Self::Future {
        let server = Arc::clone(&self.server);
        Box::pin(async move { Ok(server.handle(request).await) })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
