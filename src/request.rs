//! Incoming request type.
//!
//! A [`Request`] is what the decode combinators look at: the method, the path
//! already split into segments, a multi-valued query map, the headers and the
//! fully buffered body. It is built once by the transport and never mutated.

use std::collections::HashMap;

use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;

/// A fully received request.
#[derive(Debug, Clone)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) segments: Vec<String>,
    pub(crate) query: HashMap<String, Vec<String>>,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<Bytes>,
}

impl Request {
    /// Builds a request from the parts handed over by the transport.
    pub fn from_parts(parts: http::request::Parts, body: Bytes) -> Self {
        let (segments, query) = split_target(parts.uri.path(), parts.uri.query());
        Self {
            method: parts.method,
            segments,
            query,
            headers: parts.headers,
            body: (!body.is_empty()).then_some(body),
        }
    }

    /// Starts a request by hand. Defaults to `GET /` with no body.
    pub fn builder() -> RequestBuilder {
        RequestBuilder {
            method: Method::GET,
            target: "/".to_owned(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn segments(&self) -> &[String] { &self.segments }
    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// The body, or `None` if the request carried no bytes.
    pub fn body(&self) -> Option<&Bytes> { self.body.as_ref() }

    /// The path re-assembled from its segments, always starting with `/`.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    /// First value of a query parameter.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name)?.first().map(String::as_str)
    }

    /// Every value of a query parameter, in the order they were sent.
    pub fn query_all(&self, name: &str) -> &[String] {
        self.query.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Case-insensitive header lookup. Values that are not visible ASCII are
    /// reported as `Err` with the raw value so callers can tell them apart
    /// from a missing header.
    pub fn header(&self, name: &str) -> Option<Result<&str, &HeaderValue>> {
        let value = self.headers.get(name)?;
        Some(value.to_str().map_err(|_| value))
    }
}

/// Fluent builder for [`Request`], obtained via [`Request::builder`].
pub struct RequestBuilder {
    method: Method,
    target: String,
    headers: HeaderMap,
    body: Bytes,
}

impl RequestBuilder {
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Path plus optional query string, e.g. `/todos?limit=10`.
    pub fn uri(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Request {
        let (path, query) = match self.target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (self.target.as_str(), None),
        };
        let (segments, query) = split_target(path, query);
        Request {
            method: self.method,
            segments,
            query,
            headers: self.headers,
            body: (!self.body.is_empty()).then_some(self.body),
        }
    }
}

fn split_target(path: &str, query: Option<&str>) -> (Vec<String>, HashMap<String, Vec<String>>) {
    let segments = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
        .collect();

    let mut params: HashMap<String, Vec<String>> = HashMap::new();
    let pairs = query
        .and_then(|query| serde_urlencoded::from_str::<Vec<(String, String)>>(query).ok())
        .unwrap_or_default();
    for (name, value) in pairs {
        params.entry(name).or_default().push(value);
    }

    (segments, params)
}
