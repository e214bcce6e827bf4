//! Filters: composable decorators around a [`Service`].
//!
//! A filter receives the request together with a [`Next`] token standing for
//! the rest of the chain. It may rewrite the request, call `next` at most once,
//! rewrite the response, intercept a failure, or answer on its own without
//! calling `next` at all (short-circuit).
//!
//! Filters compose right-to-left: for `[f1, f2, f3]` and terminal `h`,
//! `f1` sees the request first and the response last.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use trellis_core::Failure;

use super::handler::Service;
use crate::protocol::Protocol;

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// A pipeline stage wrapping the rest of the chain.
///
/// Identity is positional: registering the same filter type twice (with the
/// same or different parameters) yields two distinct stages.
#[async_trait]
pub trait Filter<P: Protocol>: Send + Sync {
    async fn apply(&self, request: P::Request, next: Next<'_, P>) -> Result<P::Response, Failure>;

    /// Name used in logs and chain introspection.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

#[async_trait]
impl<P, F> Filter<P> for Arc<F>
where
    P: Protocol,
    F: Filter<P> + ?Sized,
{
    async fn apply(&self, request: P::Request, next: Next<'_, P>) -> Result<P::Response, Failure> {
        (**self).apply(request, next).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

// ---------------------------------------------------------------------------
// Next
// ---------------------------------------------------------------------------

/// Single-use handle to the remainder of a filter chain.
///
/// `run` takes `self` by value, so a filter cannot invoke its downstream twice
/// for the same dispatch; the token is neither `Clone` nor `Copy`.
pub struct Next<'a, P: Protocol> {
    filters: &'a [Arc<dyn Filter<P>>],
    terminal: &'a dyn Service<P>,
}

impl<'a, P: Protocol> Next<'a, P> {
    pub(crate) fn new(filters: &'a [Arc<dyn Filter<P>>], terminal: &'a dyn Service<P>) -> Self {
        Self { filters, terminal }
    }

    /// Invokes the next stage (the following filter, or the terminal service).
    pub async fn run(self, request: P::Request) -> Result<P::Response, Failure> {
        match self.filters.split_first() {
            Some((filter, rest)) => filter.apply(request, Next::new(rest, self.terminal)).await,
            None => self.terminal.call(request).await,
        }
    }

    /// Number of filters still ahead of the terminal service.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.filters.len()
    }
}

impl<P: Protocol> fmt::Debug for Next<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.filters.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// FilterChain
// ---------------------------------------------------------------------------

/// Ordered list of filters, outermost first.
pub struct FilterChain<P: Protocol> {
    filters: Vec<Arc<dyn Filter<P>>>,
}

impl<P: Protocol> FilterChain<P> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// Appends `filter` as the innermost stage so far.
    #[must_use]
    pub fn and_then(mut self, filter: impl Filter<P> + 'static) -> Self {
        self.push(Arc::new(filter));
        self
    }

    pub fn push(&mut self, filter: Arc<dyn Filter<P>>) {
        self.filters.push(filter);
    }

    /// Appends every stage of `other` after the stages of `self`.
    pub fn extend(&mut self, other: &FilterChain<P>) {
        self.filters.extend(other.filters.iter().cloned());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Terminates the chain with `terminal`, producing one effective service.
    #[must_use]
    pub fn into_service(self, terminal: impl Service<P> + 'static) -> FilteredService<P> {
        self.into_service_arc(Arc::new(terminal))
    }

    #[must_use]
    pub fn into_service_arc(self, terminal: Arc<dyn Service<P>>) -> FilteredService<P> {
        FilteredService {
            filters: self.filters.into(),
            terminal,
        }
    }
}

impl<P: Protocol> Default for FilterChain<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Protocol> Clone for FilterChain<P> {
    fn clone(&self) -> Self {
        Self {
            filters: self.filters.clone(),
        }
    }
}

impl<P: Protocol> fmt::Debug for FilterChain<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl<P: Protocol> FromIterator<Arc<dyn Filter<P>>> for FilterChain<P> {
    fn from_iter<I: IntoIterator<Item = Arc<dyn Filter<P>>>>(iter: I) -> Self {
        Self {
            filters: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// FilteredService
// ---------------------------------------------------------------------------

/// A terminal service together with the filters wrapping it.
///
/// Immutable once built; cloning shares the underlying stages.
pub struct FilteredService<P: Protocol> {
    filters: Arc<[Arc<dyn Filter<P>>]>,
    terminal: Arc<dyn Service<P>>,
}

impl<P: Protocol> FilteredService<P> {
    /// Stage names in execution order.
    #[must_use]
    pub fn filter_names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }
}

impl<P: Protocol> Clone for FilteredService<P> {
    fn clone(&self) -> Self {
        Self {
            filters: Arc::clone(&self.filters),
            terminal: Arc::clone(&self.terminal),
        }
    }
}

impl<P: Protocol> fmt::Debug for FilteredService<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilteredService")
            .field("filters", &self.filter_names())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<P: Protocol> Service<P> for FilteredService<P> {
    async fn call(&self, request: P::Request) -> Result<P::Response, Failure> {
        Next::new(&self.filters, self.terminal.as_ref())
            .run(request)
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
