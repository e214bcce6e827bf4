//! Failure taxonomy for the dispatch path.
//!
//! A dispatch either produces a response or a single [`Failure`]. Failures are
//! categorised by [`FailureKind`], an explicit tagged union whose
//! [`lineage`](FailureKind::lineage) gives the order in which exception mappers
//! are consulted: most specific first, [`FailureKind::Default`] last.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// AppKind
// ---------------------------------------------------------------------------

/// Application-declared failure category.
///
/// App kinds are declared as constants and may refine a parent kind:
///
/// ```
/// use trellis_core::AppKind;
///
/// const FOO: AppKind = AppKind::new("foo");
/// const BAR: AppKind = AppKind::child_of("bar", &FOO);
///
/// assert_eq!(BAR.parent(), Some(FOO));
/// ```
///
/// Equality and hashing use the name only, so names must be unique within an
/// application.
#[derive(Debug, Clone, Copy)]
pub struct AppKind {
    name: &'static str,
    parent: Option<&'static AppKind>,
}

impl AppKind {
    /// Declares a root application kind (its parent is `Handler`).
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    /// Declares a kind that refines `parent`.
    #[must_use]
    pub const fn child_of(name: &'static str, parent: &'static AppKind) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn parent(&self) -> Option<AppKind> {
        self.parent.copied()
    }
}

impl PartialEq for AppKind {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for AppKind {}

impl Hash for AppKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for AppKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// ---------------------------------------------------------------------------
// FailureKind
// ---------------------------------------------------------------------------

/// Category of a dispatch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// No binding accepted the request.
    RouteNotFound,
    /// Invalid or conflicting configuration (duplicate route, sealed registry, ...).
    Configuration,
    /// The terminal handler raised an error.
    Handler,
    /// A deadline expired before the downstream chain completed.
    Timeout,
    /// The transport cancelled the dispatch.
    Cancelled,
    /// The server refused work because it is at capacity.
    Overloaded,
    /// No exception mapper was registered for the failure.
    Unmapped,
    /// Application-defined category, refining `Handler`.
    App(AppKind),
    /// Catch-all; every lineage ends here.
    Default,
}

impl FailureKind {
    /// The next, more general kind, or `None` for [`FailureKind::Default`].
    #[must_use]
    pub fn parent(self) -> Option<FailureKind> {
        match self {
            Self::Default => None,
            Self::App(kind) => Some(kind.parent().map_or(Self::Handler, Self::App)),
            _ => Some(Self::Default),
        }
    }

    /// Iterates from this kind toward [`FailureKind::Default`], inclusive.
    pub fn lineage(self) -> impl Iterator<Item = FailureKind> {
        std::iter::successors(Some(self), |kind| kind.parent())
    }

    /// Stable label used in logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RouteNotFound => "route_not_found",
            Self::Configuration => "configuration",
            Self::Handler => "handler",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Overloaded => "overloaded",
            Self::Unmapped => "unmapped",
            Self::App(kind) => kind.name(),
            Self::Default => "default",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Failure
// ---------------------------------------------------------------------------

/// A categorised dispatch failure with an optional underlying cause.
///
/// Cheap to clone: the cause is shared.
#[derive(Debug, Clone)]
pub struct Failure {
    kind: FailureKind,
    message: String,
    cause: Option<Arc<anyhow::Error>>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Attaches the underlying error.
    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = Some(Arc::new(cause.into()));
        self
    }

    pub fn route_not_found(request: impl fmt::Display) -> Self {
        Self::new(FailureKind::RouteNotFound, format!("no route for {request}"))
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Configuration, message)
    }

    /// Wraps an error raised by a terminal handler.
    pub fn handler(cause: impl Into<anyhow::Error>) -> Self {
        let cause = cause.into();
        Self {
            kind: FailureKind::Handler,
            message: cause.to_string(),
            cause: Some(Arc::new(cause)),
        }
    }

    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("timed out after {}ms", after.as_millis()),
        )
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "dispatch cancelled")
    }

    #[must_use]
    pub fn overloaded() -> Self {
        Self::new(FailureKind::Overloaded, "server overloaded, try again later")
    }

    pub fn app(kind: AppKind, message: impl Into<String>) -> Self {
        Self::new(FailureKind::App(kind), message)
    }

    #[must_use]
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_deref()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|cause| {
            let err: &(dyn std::error::Error + Send + Sync + 'static) = cause.as_ref();
            err as &(dyn std::error::Error + 'static)
        })
    }
}

impl From<anyhow::Error> for Failure {
    fn from(cause: anyhow::Error) -> Self {
        Self::handler(cause)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
