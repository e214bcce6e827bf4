//! Exception mapping: turns a [`Failure`] into a protocol response.
//!
//! Mappers are keyed by [`FailureKind`]. Resolution walks the failure's
//! lineage (most specific kind first, `Default` last) and uses the first
//! registered mapper. When nothing matches, the protocol's generic
//! internal-error response is returned, so resolution never fails.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use http::StatusCode;
use tracing::{debug, warn};
use trellis_core::{
    ApplicationException, ApplicationExceptionKind, Failure, FailureKind, HttpResponse,
    ThriftResponse,
};

use crate::protocol::{error_body, Http, Protocol, Thrift};

// ---------------------------------------------------------------------------
// ExceptionMapper
// ---------------------------------------------------------------------------

/// Converts a failure into a response.
pub trait ExceptionMapper<P: Protocol>: Send + Sync {
    fn to_response(&self, failure: &Failure) -> P::Response;
}

/// Mapper backed by a closure. Built with [`mapper_fn`].
pub struct MapperFn<F> {
    f: F,
}

/// Wraps a closure as an [`ExceptionMapper`].
pub fn mapper_fn<F>(f: F) -> MapperFn<F> {
    MapperFn { f }
}

impl<P, F> ExceptionMapper<P> for MapperFn<F>
where
    P: Protocol,
    F: Fn(&Failure) -> P::Response + Send + Sync,
{
    fn to_response(&self, failure: &Failure) -> P::Response {
        (self.f)(failure)
    }
}

// ---------------------------------------------------------------------------
// ExceptionMappers
// ---------------------------------------------------------------------------

type MapperTable<P> = HashMap<FailureKind, Arc<dyn ExceptionMapper<P>>>;

/// Shared registry of exception mappers.
///
/// Cloning yields another handle to the same registry, so a filter built
/// during configuration sees mappers registered later. Reads are lock-free
/// (`ArcSwap`); registration is only allowed until [`seal`](Self::seal).
/// Writers serialize on the seal flag, so no registration lands after
/// `seal` returns.
///
/// Registering a mapper for a kind that already has one replaces it: the
/// last registration wins.
pub struct ExceptionMappers<P: Protocol> {
    table: Arc<ArcSwap<MapperTable<P>>>,
    /// Held across the seal check and the table swap.
    sealed: Arc<Mutex<bool>>,
}

impl<P: Protocol> ExceptionMappers<P> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: Arc::new(ArcSwap::from_pointee(HashMap::new())),
            sealed: Arc::new(Mutex::new(false)),
        }
    }

    /// Associates `mapper` with `kind`, replacing any previous mapper.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` failure once the registry is sealed.
    pub fn register(
        &self,
        kind: FailureKind,
        mapper: impl ExceptionMapper<P> + 'static,
    ) -> Result<&Self, Failure> {
        let sealed = self.sealed.lock();
        if *sealed {
            return Err(Failure::configuration(format!(
                "cannot register exception mapper for `{kind}`: registry is sealed"
            )));
        }

        let mapper: Arc<dyn ExceptionMapper<P>> = Arc::new(mapper);
        let previous = self.table.rcu(|table| {
            let mut table = HashMap::clone(table);
            table.insert(kind, Arc::clone(&mapper));
            table
        });
        drop(sealed);
        if previous.contains_key(&kind) {
            debug!(protocol = P::NAME, kind = %kind, "replacing exception mapper");
        }
        Ok(self)
    }

    /// Rejects further registrations.
    pub fn seal(&self) {
        *self.sealed.lock() = true;
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        *self.sealed.lock()
    }

    /// The kind whose mapper would handle `failure`, if any.
    #[must_use]
    pub fn resolved_kind(&self, failure: &Failure) -> Option<FailureKind> {
        let table = self.table.load();
        failure.kind().lineage().find(|kind| table.contains_key(kind))
    }

    /// Converts `failure` into a response. Never fails.
    #[must_use]
    pub fn resolve(&self, failure: &Failure) -> P::Response {
        let table = self.table.load();
        if let Some(mapper) = failure.kind().lineage().find_map(|kind| table.get(&kind)) {
            return mapper.to_response(failure);
        }

        warn!(
            protocol = P::NAME,
            kind = %failure.kind(),
            outcome = %FailureKind::Unmapped,
            error = %failure,
            "no exception mapper registered, returning internal error"
        );
        P::error_response(failure)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.load().is_empty()
    }
}

impl<P: Protocol> Default for ExceptionMappers<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Protocol> Clone for ExceptionMappers<P> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            sealed: Arc::clone(&self.sealed),
        }
    }
}

impl<P: Protocol> fmt::Debug for ExceptionMappers<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.load();
        let mut kinds: Vec<&'static str> = table.keys().map(FailureKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("ExceptionMappers")
            .field("kinds", &kinds)
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Default mapper sets
// ---------------------------------------------------------------------------

/// Registers the standard HTTP mappers:
///
/// | kind            | status |
/// |-----------------|--------|
/// | `RouteNotFound` | 404    |
/// | `Timeout`       | 504    |
/// | `Overloaded`    | 503    |
/// | `Cancelled`     | 499    |
/// | `Default`       | 500    |
///
/// Bodies use the `{"errors": [...]}` shape. Only the 404 echoes the failure
/// message; everything else uses a fixed text.
///
/// # Errors
///
/// Returns a `Configuration` failure if the registry is sealed.
pub fn http_defaults(mappers: &ExceptionMappers<Http>) -> Result<(), Failure> {
    mappers
        .register(
            FailureKind::RouteNotFound,
            mapper_fn(|failure: &Failure| error_body(StatusCode::NOT_FOUND, failure.message())),
        )?
        .register(
            FailureKind::Timeout,
            mapper_fn(|_: &Failure| error_body(StatusCode::GATEWAY_TIMEOUT, "request timed out")),
        )?
        .register(
            FailureKind::Overloaded,
            mapper_fn(|_: &Failure| {
                error_body(StatusCode::SERVICE_UNAVAILABLE, "server overloaded")
            }),
        )?
        .register(
            FailureKind::Cancelled,
            mapper_fn(|_: &Failure| -> HttpResponse {
                let status = StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST);
                error_body(status, "request cancelled")
            }),
        )?
        .register(
            FailureKind::Default,
            mapper_fn(|_: &Failure| {
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }),
        )?;
    Ok(())
}

/// Registers the standard Thrift mappers, translating failure kinds into
/// `ApplicationException` kinds (`RouteNotFound` → `UnknownMethod`, everything
/// else → `InternalError`).
///
/// # Errors
///
/// Returns a `Configuration` failure if the registry is sealed.
pub fn thrift_defaults(mappers: &ExceptionMappers<Thrift>) -> Result<(), Failure> {
    fn exception(kind: ApplicationExceptionKind, failure: &Failure) -> ThriftResponse {
        ThriftResponse::exception(ApplicationException::new(kind, failure.to_string()))
    }

    mappers
        .register(
            FailureKind::RouteNotFound,
            mapper_fn(|failure: &Failure| {
                exception(ApplicationExceptionKind::UnknownMethod, failure)
            }),
        )?
        .register(
            FailureKind::Default,
            mapper_fn(|failure: &Failure| {
                exception(ApplicationExceptionKind::InternalError, failure)
            }),
        )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use trellis_core::AppKind;

    use super::*;

    const FOO: AppKind = AppKind::new("foo");
    const BAR: AppKind = AppKind::child_of("bar", &FOO);

    fn status_mapper(status: StatusCode) -> impl ExceptionMapper<Http> {
        mapper_fn(move |_: &Failure| HttpResponse::new(status))
    }

    #[test]
    fn most_specific_mapper_wins() {
        let mappers = ExceptionMappers::<Http>::new();
        mappers
            .register(FailureKind::App(BAR), status_mapper(StatusCode::BAD_REQUEST))
            .unwrap()
            .register(FailureKind::Default, status_mapper(StatusCode::INTERNAL_SERVER_ERROR))
            .unwrap();

        let resp = mappers.resolve(&Failure::app(BAR, "bar happened"));
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn parent_kind_mapper_handles_child() {
        let mappers = ExceptionMappers::<Http>::new();
        mappers
            .register(FailureKind::App(FOO), status_mapper(StatusCode::CONFLICT))
            .unwrap();

        let failure = Failure::app(BAR, "bar happened");
        assert_eq!(mappers.resolved_kind(&failure), Some(FailureKind::App(FOO)));
        assert_eq!(mappers.resolve(&failure).status, StatusCode::CONFLICT);
    }

    #[test]
    fn unregistered_kind_falls_back_to_default() {
        let mappers = ExceptionMappers::<Http>::new();
        mappers
            .register(FailureKind::Default, status_mapper(StatusCode::IM_A_TEAPOT))
            .unwrap();

        let resp = mappers.resolve(&Failure::timeout(std::time::Duration::from_millis(5)));
        assert_eq!(resp.status, StatusCode::IM_A_TEAPOT);
    }

    #[test]
    fn empty_registry_returns_generic_internal_error() {
        let mappers = ExceptionMappers::<Http>::new();
        let failure = Failure::handler(anyhow::anyhow!("boom"));
        assert_eq!(mappers.resolved_kind(&failure), None);
        assert_eq!(
            mappers.resolve(&failure).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn last_registration_wins() {
        let mappers = ExceptionMappers::<Http>::new();
        mappers
            .register(FailureKind::Handler, status_mapper(StatusCode::BAD_GATEWAY))
            .unwrap()
            .register(FailureKind::Handler, status_mapper(StatusCode::BAD_REQUEST))
            .unwrap();

        assert_eq!(mappers.len(), 1);
        let resp = mappers.resolve(&Failure::handler(anyhow::anyhow!("x")));
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn sealed_registry_rejects_registration() {
        let mappers = ExceptionMappers::<Http>::new();
        mappers.seal();
        let err = mappers
            .register(FailureKind::Default, status_mapper(StatusCode::OK))
            .err()
            .unwrap();
        assert_eq!(err.kind(), FailureKind::Configuration);
        assert!(mappers.is_empty());
    }

    #[test]
    fn no_registration_lands_after_seal() {
        let mappers = ExceptionMappers::<Http>::new();
        let writers: Vec<_> = (0..4)
            .map(|writer| {
                let mappers = mappers.clone();
                std::thread::spawn(move || {
                    for round in 0.. {
                        let generation = format!("{writer}-{round}");
                        let mapper = mapper_fn(move |_: &Failure| {
                            HttpResponse::ok().with_header("generation", generation.clone())
                        });
                        if mappers.register(FailureKind::Handler, mapper).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();

        std::thread::sleep(std::time::Duration::from_millis(10));
        mappers.seal();
        let failure = Failure::handler(anyhow::anyhow!("x"));
        let frozen = mappers.resolve(&failure).metadata.joined("generation");

        for writer in writers {
            writer.join().unwrap();
        }
        assert!(frozen.is_some());
        assert_eq!(mappers.resolve(&failure).metadata.joined("generation"), frozen);
    }

    #[test]
    fn clones_share_the_table() {
        let mappers = ExceptionMappers::<Http>::new();
        let handle = mappers.clone();
        mappers
            .register(FailureKind::Default, status_mapper(StatusCode::ACCEPTED))
            .unwrap();
        assert_eq!(
            handle.resolve(&Failure::cancelled()).status,
            StatusCode::ACCEPTED
        );
    }

    #[test]
    fn http_defaults_cover_builtin_kinds() {
        let mappers = ExceptionMappers::<Http>::new();
        http_defaults(&mappers).unwrap();

        let not_found = mappers.resolve(&Failure::route_not_found("GET /x"));
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);
        assert_eq!(not_found.body_text(), r#"{"errors":["no route for GET /x"]}"#);
        assert_eq!(mappers.resolve(&Failure::overloaded()).status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(mappers.resolve(&Failure::cancelled()).status.as_u16(), 499);
        assert_eq!(
            mappers.resolve(&Failure::app(BAR, "x")).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn thrift_defaults_map_route_not_found_to_unknown_method() {
        let mappers = ExceptionMappers::<Thrift>::new();
        thrift_defaults(&mappers).unwrap();

        let resp = mappers.resolve(&Failure::route_not_found("nope"));
        assert_eq!(
            resp.as_exception().map(|e| e.kind),
            Some(ApplicationExceptionKind::UnknownMethod)
        );
        let resp = mappers.resolve(&Failure::timeout(std::time::Duration::from_secs(1)));
        assert_eq!(
            resp.as_exception().map(|e| e.kind),
            Some(ApplicationExceptionKind::InternalError)
        );
    }
}
