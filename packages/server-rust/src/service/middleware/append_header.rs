//! Fixed-value request metadata.

use async_trait::async_trait;
use trellis_core::{Failure, Message};

use crate::protocol::Protocol;
use crate::service::filter::{Filter, Next};

/// Appends a fixed value to a request metadata key before calling downstream.
///
/// Existing values are kept: two instances appending `"1"` and `"2"` to the
/// same key leave the handler reading `"1,2"`.
#[derive(Debug, Clone)]
pub struct AppendHeaderFilter {
    name: String,
    value: String,
}

impl AppendHeaderFilter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[async_trait]
impl<P: Protocol> Filter<P> for AppendHeaderFilter {
    async fn apply(
        &self,
        mut request: P::Request,
        next: Next<'_, P>,
    ) -> Result<P::Response, Failure> {
        request
            .metadata_mut()
            .append(self.name.clone(), self.value.clone());
        next.run(request).await
    }

    fn name(&self) -> &'static str {
        "append_header"
    }
}

#[cfg(test)]
mod tests {
    use trellis_core::{ThriftRequest, ThriftResponse};

    use super::*;
    use crate::protocol::Thrift;
    use crate::service::filter::FilterChain;
    use crate::service::handler::{service_fn, Service};

    #[tokio::test]
    async fn works_for_thrift_metadata_too() {
        let svc = FilterChain::<Thrift>::new()
            .and_then(AppendHeaderFilter::new("test", "1"))
            .and_then(AppendHeaderFilter::new("test", "2"))
            .into_service(service_fn(|req: ThriftRequest| async move {
                let joined = req.metadata.joined("test").unwrap_or_default();
                Ok::<_, Failure>(ThriftResponse::success(joined))
            }));

        let resp = svc.call(ThriftRequest::new("m")).await.unwrap();
        assert_eq!(resp, ThriftResponse::success("1,2"));
    }
}
