//! Client id acceptlist.
//!
//! Callers identify themselves with a `client-id` metadata entry. Requests
//! without one, or with an id outside the configured set, fail with an `App`
//! failure whose kind is a child of [`CLIENT_ID_REJECTED`], so a single
//! mapper can cover both cases.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::debug;
use trellis_core::{AppKind, Failure, Message};

use crate::protocol::Protocol;
use crate::service::filter::{Filter, Next};

pub const CLIENT_ID_HEADER: &str = "client-id";

pub const CLIENT_ID_REJECTED: AppKind = AppKind::new("CLIENT_ID_REJECTED");
pub const MISSING_CLIENT_ID: AppKind = AppKind::child_of("MISSING_CLIENT_ID", &CLIENT_ID_REJECTED);
pub const UNKNOWN_CLIENT_ID: AppKind = AppKind::child_of("UNKNOWN_CLIENT_ID", &CLIENT_ID_REJECTED);

#[derive(Debug, Clone)]
pub struct ClientIdAcceptlistFilter {
    accepted: HashSet<String>,
}

impl ClientIdAcceptlistFilter {
    pub fn new<I, S>(accepted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accepted: accepted.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn accepts(&self, client_id: &str) -> bool {
        self.accepted.contains(client_id)
    }
}

#[async_trait]
impl<P: Protocol> Filter<P> for ClientIdAcceptlistFilter {
    async fn apply(&self, request: P::Request, next: Next<'_, P>) -> Result<P::Response, Failure> {
        let Some(client_id) = request.metadata().get(CLIENT_ID_HEADER) else {
            return Err(Failure::app(
                MISSING_CLIENT_ID,
                "request is missing a client id",
            ));
        };
        if !self.accepts(client_id) {
            debug!(protocol = P::NAME, client_id, "rejecting unknown client id");
            return Err(Failure::app(
                UNKNOWN_CLIENT_ID,
                format!("unknown client id `{client_id}`"),
            ));
        }
        next.run(request).await
    }

    fn name(&self) -> &'static str {
        "client_id_acceptlist"
    }
}
