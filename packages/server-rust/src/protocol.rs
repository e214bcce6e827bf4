//! Protocol abstraction: lets one filter/router/exception-mapping core serve
//! both the HTTP-style and the RPC-style wire protocols.

use std::borrow::Cow;
use std::fmt;

use http::StatusCode;
use serde_json::json;
use trellis_core::{
    ApplicationException, ApplicationExceptionKind, Failure, HttpRequest, HttpResponse, Message,
    ThriftReply, ThriftRequest, ThriftResponse,
};

use crate::service::matcher::{HttpMatcher, ThriftMatcher};

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// Binds together the request, response, and route-matcher types of a wire
/// protocol, plus the few protocol-specific responses the core must be able
/// to produce on its own.
pub trait Protocol: Sized + Send + Sync + 'static {
    type Request: Message + Clone + fmt::Debug + Send + Sync + 'static;
    type Response: Message + fmt::Debug + Send + 'static;
    type Matcher: RouteMatcher<Self::Request>;

    /// Short protocol name used in logs and metric labels.
    const NAME: &'static str;

    /// Human-readable request summary (`GET /users/1`, `getUser`).
    fn describe(request: &Self::Request) -> String;

    /// Low-cardinality outcome label for a response (status code, reply type).
    fn response_label(response: &Self::Response) -> Cow<'static, str>;

    /// Generic internal-error response, used when no exception mapper applies.
    fn error_response(failure: &Failure) -> Self::Response;

    /// Response for requests that arrive while the server is not `Ready`.
    fn unavailable_response() -> Self::Response;
}

// ---------------------------------------------------------------------------
// RouteMatcher
// ---------------------------------------------------------------------------

/// How specifically a matcher accepted a request.
///
/// `Exact` beats `Pattern`; among equal ranks the first registered binding wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchRank {
    Pattern,
    Exact,
}

/// Decides whether a binding accepts a request.
pub trait RouteMatcher<Req>: fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Returns the match rank, or `None` if the request is not accepted.
    fn rank(&self, request: &Req) -> Option<MatchRank>;

    /// True if both matchers would claim the same requests with the same rank,
    /// which makes the routing table ambiguous.
    fn conflicts_with(&self, other: &Self) -> bool;

    /// Copies captured values (path parameters) into the request.
    fn bind(&self, _request: &mut Req) {}
}

// ---------------------------------------------------------------------------
// Http
// ---------------------------------------------------------------------------

/// Synchronous request/response HTTP protocol.
#[derive(Debug, Clone, Copy)]
pub struct Http;

impl Protocol for Http {
    type Request = HttpRequest;
    type Response = HttpResponse;
    type Matcher = HttpMatcher;

    const NAME: &'static str = "http";

    fn describe(request: &HttpRequest) -> String {
        format!("{} {}", request.method, request.path)
    }

    fn response_label(response: &HttpResponse) -> Cow<'static, str> {
        Cow::Owned(response.status.as_u16().to_string())
    }

    fn error_response(_failure: &Failure) -> HttpResponse {
        error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }

    fn unavailable_response() -> HttpResponse {
        error_body(StatusCode::SERVICE_UNAVAILABLE, "server is not accepting requests")
    }
}

/// JSON error body in the `{"errors": [...]}` shape used by every HTTP error
/// response the core produces.
pub(crate) fn error_body(status: StatusCode, message: &str) -> HttpResponse {
    let body = json!({ "errors": [message] }).to_string();
    HttpResponse::new(status)
        .with_header("content-type", "application/json")
        .with_body(body)
}

// ---------------------------------------------------------------------------
// Thrift
// ---------------------------------------------------------------------------

/// RPC protocol routed by method name.
#[derive(Debug, Clone, Copy)]
pub struct Thrift;

impl Protocol for Thrift {
    type Request = ThriftRequest;
    type Response = ThriftResponse;
    type Matcher = ThriftMatcher;

    const NAME: &'static str = "thrift";

    fn describe(request: &ThriftRequest) -> String {
        request.method.clone()
    }

    fn response_label(response: &ThriftResponse) -> Cow<'static, str> {
        match &response.reply {
            ThriftReply::Success(_) => Cow::Borrowed("success"),
            ThriftReply::Exception(exception) => {
                Cow::Owned(format!("exception_{}", exception.kind.code()))
            }
        }
    }

    fn error_response(failure: &Failure) -> ThriftResponse {
        ThriftResponse::exception(ApplicationException::new(
            ApplicationExceptionKind::InternalError,
            failure.to_string(),
        ))
    }

    fn unavailable_response() -> ThriftResponse {
        ThriftResponse::exception(ApplicationException::new(
            ApplicationExceptionKind::InternalError,
            "server is not accepting requests",
        ))
    }
}

#[cfg(test)]
mod tests {
    use trellis_core::FailureKind;

    use super::*;

    #[test]
    fn http_error_response_is_generic_500() {
        let failure = Failure::new(FailureKind::Handler, "secret detail");
        let resp = Http::error_response(&failure);
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.body_text(), r#"{"errors":["internal server error"]}"#);
    }

    #[test]
    fn thrift_error_response_is_internal_error_exception() {
        let failure = Failure::new(FailureKind::Handler, "boom");
        let resp = Thrift::error_response(&failure);
        let exception = resp.as_exception().unwrap();
        assert_eq!(exception.kind, ApplicationExceptionKind::InternalError);
        assert_eq!(exception.message, "handler: boom");
    }

    #[test]
    fn response_labels() {
        assert_eq!(Http::response_label(&HttpResponse::ok()), "200");
        assert_eq!(
            Thrift::response_label(&ThriftResponse::success(&b""[..])),
            "success"
        );
        assert_eq!(
            Thrift::response_label(&Thrift::unavailable_response()),
            "exception_6"
        );
    }

    #[test]
    fn describe_requests() {
        assert_eq!(Http::describe(&HttpRequest::get("/foo?x=1")), "GET /foo");
        assert_eq!(Thrift::describe(&ThriftRequest::new("echo")), "echo");
    }
}
