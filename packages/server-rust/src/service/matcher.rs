//! Route matchers for the HTTP and Thrift protocols.
//!
//! HTTP patterns are `/`-separated segments:
//! - `users`: literal, compared case-sensitively
//! - `:id`: single-segment parameter
//! - `*rest`: wildcard capturing the remainder of the path (last segment only)
//!
//! A trailing slash is ignored on both patterns and request paths. Patterns
//! made only of literals match with [`MatchRank::Exact`].

use std::fmt;

use http::Method;
use trellis_core::{Failure, HttpRequest, ThriftRequest};

use crate::protocol::{MatchRank, RouteMatcher};

// ---------------------------------------------------------------------------
// PathPattern
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard(String),
}

impl Segment {
    /// Same position-wise shape, ignoring parameter names.
    fn same_shape(&self, other: &Segment) -> bool {
        match (self, other) {
            (Self::Literal(a), Self::Literal(b)) => a == b,
            (Self::Param(_), Self::Param(_)) | (Self::Wildcard(_), Self::Wildcard(_)) => true,
            _ => false,
        }
    }
}

/// Parsed HTTP path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Parses a pattern.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` failure if the pattern does not start with
    /// `/`, has an empty parameter name, repeats a parameter name, or places a
    /// wildcard anywhere but the last segment.
    pub fn parse(pattern: &str) -> Result<Self, Failure> {
        if !pattern.starts_with('/') {
            return Err(Failure::configuration(format!(
                "route pattern `{pattern}` must start with `/`"
            )));
        }

        let parts = split_path(pattern);
        let mut segments = Vec::with_capacity(parts.len());
        let mut names: Vec<&str> = Vec::new();

        for (index, part) in parts.iter().enumerate() {
            let segment = if let Some(name) = part.strip_prefix(':') {
                Segment::Param(name.to_string())
            } else if let Some(name) = part.strip_prefix('*') {
                if index + 1 != parts.len() {
                    return Err(Failure::configuration(format!(
                        "wildcard `{part}` must be the last segment of `{pattern}`"
                    )));
                }
                Segment::Wildcard(name.to_string())
            } else {
                Segment::Literal((*part).to_string())
            };

            if let Segment::Param(name) | Segment::Wildcard(name) = &segment {
                if name.is_empty() {
                    return Err(Failure::configuration(format!(
                        "unnamed parameter in route pattern `{pattern}`"
                    )));
                }
                if names.contains(&name.as_str()) {
                    return Err(Failure::configuration(format!(
                        "parameter `{name}` appears twice in `{pattern}`"
                    )));
                }
                names.push(&part[1..]);
            }
            segments.push(segment);
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when every segment is a literal.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }

    /// Structural equality, ignoring parameter names.
    #[must_use]
    pub fn same_shape(&self, other: &PathPattern) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| a.same_shape(b))
    }

    /// Matches `path`, returning captured parameters in pattern order.
    #[must_use]
    pub fn captures(&self, path: &str) -> Option<Vec<(String, String)>> {
        let parts = split_path(path);
        let mut captured = Vec::new();

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(literal) => {
                    if parts.get(index) != Some(&literal.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(index)?;
                    captured.push((name.clone(), (*value).to_string()));
                }
                Segment::Wildcard(name) => {
                    captured.push((name.clone(), parts[index.min(parts.len())..].join("/")));
                    return Some(captured);
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(captured)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Splits a path into non-empty segments, ignoring leading/trailing slashes.
fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

// ---------------------------------------------------------------------------
// HttpMatcher
// ---------------------------------------------------------------------------

/// Matches HTTP requests by method and path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpMatcher {
    method: Method,
    pattern: PathPattern,
}

impl HttpMatcher {
    /// # Errors
    ///
    /// Returns a `Configuration` failure if `pattern` is invalid.
    pub fn new(method: Method, pattern: &str) -> Result<Self, Failure> {
        Ok(Self {
            method,
            pattern: PathPattern::parse(pattern)?,
        })
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }
}

impl fmt::Display for HttpMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.pattern)
    }
}

impl RouteMatcher<HttpRequest> for HttpMatcher {
    fn rank(&self, request: &HttpRequest) -> Option<MatchRank> {
        if request.method != self.method {
            return None;
        }
        self.pattern.captures(&request.path)?;
        Some(if self.pattern.is_exact() {
            MatchRank::Exact
        } else {
            MatchRank::Pattern
        })
    }

    fn conflicts_with(&self, other: &Self) -> bool {
        self.method == other.method && self.pattern.same_shape(&other.pattern)
    }

    fn bind(&self, request: &mut HttpRequest) {
        if let Some(captured) = self.pattern.captures(&request.path) {
            request.params.extend(captured);
        }
    }
}

// ---------------------------------------------------------------------------
// ThriftMatcher
// ---------------------------------------------------------------------------

/// Matches RPC calls by method name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThriftMatcher {
    method: String,
}

impl ThriftMatcher {
    /// # Errors
    ///
    /// Returns a `Configuration` failure if `method` is empty.
    pub fn new(method: impl Into<String>) -> Result<Self, Failure> {
        let method = method.into();
        if method.is_empty() {
            return Err(Failure::configuration("thrift method name must not be empty"));
        }
        Ok(Self { method })
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }
}

impl fmt::Display for ThriftMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.method)
    }
}

impl RouteMatcher<ThriftRequest> for ThriftMatcher {
    fn rank(&self, request: &ThriftRequest) -> Option<MatchRank> {
        (request.method == self.method).then_some(MatchRank::Exact)
    }

    fn conflicts_with(&self, other: &Self) -> bool {
        self.method == other.method
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use trellis_core::FailureKind;

    use super::*;

    fn matcher(method: Method, pattern: &str) -> HttpMatcher {
        HttpMatcher::new(method, pattern).unwrap()
    }

    #[test]
    fn literal_pattern_matches_exactly() {
        let m = matcher(Method::GET, "/foo/bar");
        assert_eq!(m.rank(&HttpRequest::get("/foo/bar")), Some(MatchRank::Exact));
        assert_eq!(m.rank(&HttpRequest::get("/foo/bar/")), Some(MatchRank::Exact));
        assert_eq!(m.rank(&HttpRequest::get("/foo")), None);
        assert_eq!(m.rank(&HttpRequest::get("/foo/bar/baz")), None);
        assert_eq!(m.rank(&HttpRequest::post("/foo/bar")), None);
    }

    #[test]
    fn params_are_captured_and_bound() {
        let m = matcher(Method::GET, "/users/:id/posts/:post");
        let mut req = HttpRequest::get("/users/42/posts/7");
        assert_eq!(m.rank(&req), Some(MatchRank::Pattern));

        m.bind(&mut req);
        assert_eq!(req.param("id"), Some("42"));
        assert_eq!(req.param("post"), Some("7"));
    }

    #[test]
    fn wildcard_captures_remainder() {
        let m = matcher(Method::GET, "/static/*file");
        let mut req = HttpRequest::get("/static/css/site.css");
        assert_eq!(m.rank(&req), Some(MatchRank::Pattern));
        m.bind(&mut req);
        assert_eq!(req.param("file"), Some("css/site.css"));

        let mut empty = HttpRequest::get("/static");
        assert_eq!(m.rank(&empty), Some(MatchRank::Pattern));
        m.bind(&mut empty);
        assert_eq!(empty.param("file"), Some(""));
    }

    #[test]
    fn root_pattern_matches_root_only() {
        let m = matcher(Method::GET, "/");
        assert_eq!(m.rank(&HttpRequest::get("/")), Some(MatchRank::Exact));
        assert_eq!(m.rank(&HttpRequest::get("/x")), None);
    }

    #[test]
    fn invalid_patterns_are_configuration_failures() {
        for pattern in ["foo", "/a/:", "/*rest/tail", "/:id/:id"] {
            let err = HttpMatcher::new(Method::GET, pattern).unwrap_err();
            assert_eq!(err.kind(), FailureKind::Configuration, "{pattern}");
        }
    }

    #[test]
    fn conflicts_ignore_param_names_but_not_method() {
        let a = matcher(Method::GET, "/users/:id");
        let b = matcher(Method::GET, "/users/:name/");
        let c = matcher(Method::POST, "/users/:id");
        let d = matcher(Method::GET, "/users/me");

        assert!(a.conflicts_with(&b));
        assert!(!a.conflicts_with(&c));
        assert!(!a.conflicts_with(&d));
        assert!(d.conflicts_with(&matcher(Method::GET, "/users/me")));
    }

    #[test]
    fn thrift_matcher_matches_method_name() {
        let m = ThriftMatcher::new("echo").unwrap();
        assert_eq!(m.rank(&ThriftRequest::new("echo")), Some(MatchRank::Exact));
        assert_eq!(m.rank(&ThriftRequest::new("ping")), None);
        assert!(m.conflicts_with(&ThriftMatcher::new("echo").unwrap()));
        assert!(ThriftMatcher::new("").is_err());
    }
}
