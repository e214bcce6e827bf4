//! Bridges axum requests into the server's dispatch path.

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::Response;
use bytes::Bytes;
use serde_json::json;
use tracing::warn;
use trellis_core::{HttpRequest, HttpResponse};

use super::AppState;

/// Fallback handler: every request that is not a health probe goes through
/// `Server::handle`.
///
/// hyper drops this future when the client disconnects, which drops the
/// filter chain mid-dispatch and releases its guards and permits. No
/// cancellation token is involved; `Server::handle_cancellable` serves
/// transports that own one.
pub async fn dispatch_handler(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, state.config.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "rejecting request body");
            return payload_too_large();
        }
    };

    let response = state.server.handle(into_http_request(&parts, body)).await;
    into_axum_response(response)
}

/// Converts request parts into an `HttpRequest`. Headers that are not
/// visible ASCII are skipped.
#[must_use]
pub fn into_http_request(parts: &Parts, body: Bytes) -> HttpRequest {
    let target = parts
        .uri
        .path_and_query()
        .map_or("/", |path_and_query| path_and_query.as_str());
    let mut request = HttpRequest::new(parts.method.clone(), target).with_body(body);
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            request.metadata.append(name.as_str(), value);
        }
    }
    request
}

/// Converts an `HttpResponse` into an axum response, dropping metadata
/// entries that are not valid header names or values.
#[must_use]
pub fn into_axum_response(response: HttpResponse) -> Response {
    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = response.status;
    for (name, value) in response.metadata.iter() {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                out.headers_mut().append(name, value);
            }
            _ => warn!(header = name, "dropping invalid response header"),
        }
    }
    out
}

fn payload_too_large() -> Response {
    let body = json!({ "errors": ["request body too large"] }).to_string();
    let mut out = Response::new(Body::from(body));
    *out.status_mut() = StatusCode::PAYLOAD_TOO_LARGE;
    out.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    out
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, Request as HttpRequestBuilder};

    use super::*;

    #[test]
    fn request_conversion_keeps_method_target_headers_and_body() {
        let (parts, ()) = HttpRequestBuilder::builder()
            .method(Method::POST)
            .uri("/users/7?verbose=true")
            .header("test", "1")
            .header("test", "2")
            .body(())
            .unwrap()
            .into_parts();

        let request = into_http_request(&parts, Bytes::from_static(b"payload"));
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.path, "/users/7");
        assert_eq!(request.query_param("verbose"), Some("true"));
        assert_eq!(request.metadata.joined("test").as_deref(), Some("1,2"));
        assert_eq!(request.body, Bytes::from_static(b"payload"));
    }

    #[test]
    fn response_conversion_copies_status_and_headers() {
        let response = HttpResponse::new(StatusCode::CREATED)
            .with_header("x-one", "1")
            .with_header("bad header", "dropped")
            .with_body("made");

        let out = into_axum_response(response);
        assert_eq!(out.status(), StatusCode::CREATED);
        assert_eq!(out.headers()["x-one"], "1");
        assert_eq!(out.headers().len(), 1);
    }
}
