//! Decode combinators.
//!
//! Every function here returns an [`Endpoint`] that looks at one part of a
//! [`Request`]: a path segment, a query parameter, a header or the body.
//! Evaluating an endpoint yields a [`DecodeResult`], which keeps three
//! outcomes apart:
//!
//! - [`DecodeResult::Matched`]: the value plus the unconsumed input.
//! - [`DecodeResult::NotMatched`]: this request is not for us; alternation
//!   may try something else.
//! - [`DecodeResult::Error`]: the request *was* for us but is malformed.
//!   Alternation never retries these, so a bad id on `/todos/{id}` can never
//!   fall through to `/todos`.
//!
//! Path combinators consume segments; everything else reads the request
//! without moving the cursor. None of them hold mutable state.

use std::any::type_name;
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::num::{
    NonZeroI8, NonZeroI16, NonZeroI32, NonZeroI64, NonZeroI128, NonZeroIsize, NonZeroU8,
    NonZeroU16, NonZeroU32, NonZeroU64, NonZeroU128, NonZeroUsize,
};
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;

use crate::codec::{Codec, Json};
use crate::endpoint::Endpoint;
use crate::error::BoxError;
use crate::request::Request;

// ── Input cursor ──────────────────────────────────────────────────────────────

/// A request plus the position of the first path segment not yet consumed.
#[derive(Debug, Clone, Copy)]
pub struct Input<'r> {
    request: &'r Request,
    position: usize,
}

impl<'r> Input<'r> {
    /// Input positioned at the first path segment.
    pub fn new(request: &'r Request) -> Self {
        Self { request, position: 0 }
    }

    pub fn request(&self) -> &'r Request {
        self.request
    }

    /// Path segments not consumed so far.
    pub fn remaining(&self) -> &'r [String] {
        &self.request.segments[self.position..]
    }

    pub fn peek(&self) -> Option<&'r str> {
        self.remaining().first().map(String::as_str)
    }

    /// Consumes `n` segments, stopping at the end of the path.
    pub fn advance(self, n: usize) -> Self {
        let position = (self.position + n).min(self.request.segments.len());
        Self { position, ..self }
    }

    pub fn is_exhausted(&self) -> bool {
        self.position >= self.request.segments.len()
    }
}

// ── DecodeResult ──────────────────────────────────────────────────────────────

/// Outcome of evaluating an [`Endpoint`] against an [`Input`].
#[derive(Debug)]
pub enum DecodeResult<'r, T> {
    Matched(T, Input<'r>),
    NotMatched,
    Error(DecodeError),
}

impl<'r, T> DecodeResult<'r, T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DecodeResult<'r, U> {
        self.and_then(|value, rest| DecodeResult::Matched(f(value), rest))
    }

    /// Continues with the matched value and remainder; `NotMatched` and
    /// `Error` short-circuit unchanged.
    pub fn and_then<U>(
        self,
        f: impl FnOnce(T, Input<'r>) -> DecodeResult<'r, U>,
    ) -> DecodeResult<'r, U> {
        match self {
            Self::Matched(value, rest) => f(value, rest),
            Self::NotMatched => DecodeResult::NotMatched,
            Self::Error(err) => DecodeResult::Error(err),
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched(..))
    }

    /// The matched value, discarding the remainder.
    pub fn value(self) -> Option<T> {
        match self {
            Self::Matched(value, _) => Some(value),
            _ => None,
        }
    }
}

// ── DecodeError ───────────────────────────────────────────────────────────────

/// A request that was targeted at an endpoint but could not be decoded.
///
/// The `Display` output is the message sent to the client.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("path segment `{segment}` is not a valid {expected}")]
    InvalidSegment {
        segment: String,
        expected: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("missing query parameter `{0}`")]
    MissingParam(String),

    #[error("query parameter `{name}` is not a valid {expected}")]
    InvalidParam {
        name: String,
        expected: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("missing header `{0}`")]
    MissingHeader(String),

    #[error("header `{name}` is not a valid {expected}")]
    InvalidHeader {
        name: String,
        expected: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("missing request body")]
    MissingBody,

    #[error("malformed request body")]
    InvalidBody {
        #[source]
        source: BoxError,
    },

    #[error("validation failed: {rule}")]
    Validation { rule: String },
}

impl DecodeError {
    /// Status used when this error reaches the client.
    pub fn status(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

// ── FromParam ─────────────────────────────────────────────────────────────────

/// A type that can be parsed from a single path segment, query value or
/// header value.
pub trait FromParam: Sized {
    type Error: Into<BoxError>;

    fn from_param(param: &str) -> Result<Self, Self::Error>;
}

impl FromParam for String {
    type Error = Infallible;

    fn from_param(param: &str) -> Result<Self, Self::Error> {
        Ok(param.to_owned())
    }
}

impl FromParam for uuid::Uuid {
    type Error = uuid::Error;

    fn from_param(param: &str) -> Result<Self, Self::Error> {
        uuid::Uuid::parse_str(param)
    }
}

macro_rules! from_param {
    ($($ty:ty),*) => ($(
        impl FromParam for $ty {
            type Error = <$ty as FromStr>::Err;

            fn from_param(param: &str) -> Result<Self, Self::Error> {
                <$ty as FromStr>::from_str(param)
            }
        }
    )*)
}

from_param! {
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    bool, IpAddr, Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6, SocketAddr,
    NonZeroI8, NonZeroI16, NonZeroI32, NonZeroI64, NonZeroI128, NonZeroIsize,
    NonZeroU8, NonZeroU16, NonZeroU32, NonZeroU64, NonZeroU128, NonZeroUsize
}

/// `uuid::Uuid` -> `Uuid`, `alloc::string::String` -> `String`.
fn label<T>() -> &'static str {
    let name = type_name::<T>();
    name.rsplit("::").next().unwrap_or(name)
}

// ── Path ──────────────────────────────────────────────────────────────────────

/// Matches one literal path segment.
pub fn path(literal: impl Into<String>) -> Endpoint<()> {
    let literal = literal.into();
    Endpoint::new(move |input| match input.peek() {
        Some(segment) if segment == literal => DecodeResult::Matched((), input.advance(1)),
        _ => DecodeResult::NotMatched,
    })
}

/// Extracts the next path segment as `T`.
///
/// A missing segment is `NotMatched`; a present but unparsable one is an
/// error.
pub fn segment<T>() -> Endpoint<T>
where
    T: FromParam + 'static,
{
    Endpoint::new(|input| match input.peek() {
        None => DecodeResult::NotMatched,
        Some(raw) => match T::from_param(raw) {
            Ok(value) => DecodeResult::Matched(value, input.advance(1)),
            Err(err) => DecodeResult::Error(DecodeError::InvalidSegment {
                segment: raw.to_owned(),
                expected: label::<T>(),
                source: err.into(),
            }),
        },
    })
}

/// Consumes and returns every remaining path segment.
pub fn rest() -> Endpoint<Vec<String>> {
    Endpoint::new(|input| {
        let remaining = input.remaining();
        DecodeResult::Matched(remaining.to_vec(), input.advance(remaining.len()))
    })
}

/// Matches only when the whole path has been consumed.
pub fn end() -> Endpoint<()> {
    Endpoint::new(|input| {
        if input.is_exhausted() {
            DecodeResult::Matched((), input)
        } else {
            DecodeResult::NotMatched
        }
    })
}

/// Matches every request without consuming anything.
pub fn any() -> Endpoint<()> {
    Endpoint::new(|input| DecodeResult::Matched((), input))
}

/// Matches requests with the given method.
pub fn method(method: Method) -> Endpoint<()> {
    Endpoint::new(move |input| {
        if *input.request().method() == method {
            DecodeResult::Matched((), input)
        } else {
            DecodeResult::NotMatched
        }
    })
}

// ── Query ─────────────────────────────────────────────────────────────────────

/// A required query parameter. Absent or unparsable is an error.
pub fn query<T>(name: impl Into<String>) -> Endpoint<T>
where
    T: FromParam + 'static,
{
    let name = name.into();
    Endpoint::new(move |input| match input.request().query(&name) {
        None => DecodeResult::Error(DecodeError::MissingParam(name.clone())),
        Some(raw) => match parse_query::<T>(&name, raw) {
            Ok(value) => DecodeResult::Matched(value, input),
            Err(err) => DecodeResult::Error(err),
        },
    })
}

/// An optional query parameter. Present but unparsable is still an error.
pub fn query_opt<T>(name: impl Into<String>) -> Endpoint<Option<T>>
where
    T: FromParam + 'static,
{
    let name = name.into();
    Endpoint::new(move |input| match input.request().query(&name) {
        None => DecodeResult::Matched(None, input),
        Some(raw) => match parse_query::<T>(&name, raw) {
            Ok(value) => DecodeResult::Matched(Some(value), input),
            Err(err) => DecodeResult::Error(err),
        },
    })
}

/// Every value of a multi-valued query parameter, possibly none.
pub fn query_all<T>(name: impl Into<String>) -> Endpoint<Vec<T>>
where
    T: FromParam + 'static,
{
    let name = name.into();
    Endpoint::new(move |input| {
        let values = input
            .request()
            .query_all(&name)
            .iter()
            .map(|raw| parse_query::<T>(&name, raw))
            .collect::<Result<Vec<_>, _>>();

        match values {
            Ok(values) => DecodeResult::Matched(values, input),
            Err(err) => DecodeResult::Error(err),
        }
    })
}

fn parse_query<T: FromParam>(name: &str, raw: &str) -> Result<T, DecodeError> {
    T::from_param(raw).map_err(|err| DecodeError::InvalidParam {
        name: name.to_owned(),
        expected: label::<T>(),
        source: err.into(),
    })
}

// ── Headers ───────────────────────────────────────────────────────────────────

/// A required header, looked up case-insensitively.
pub fn header<T>(name: impl Into<String>) -> Endpoint<T>
where
    T: FromParam + 'static,
{
    let name = name.into();
    Endpoint::new(move |input| match parse_header::<T>(input.request(), &name) {
        Ok(Some(value)) => DecodeResult::Matched(value, input),
        Ok(None) => DecodeResult::Error(DecodeError::MissingHeader(name.clone())),
        Err(err) => DecodeResult::Error(err),
    })
}

/// An optional header. Present but unparsable is still an error.
pub fn header_opt<T>(name: impl Into<String>) -> Endpoint<Option<T>>
where
    T: FromParam + 'static,
{
    let name = name.into();
    Endpoint::new(move |input| match parse_header::<T>(input.request(), &name) {
        Ok(value) => DecodeResult::Matched(value, input),
        Err(err) => DecodeResult::Error(err),
    })
}

fn parse_header<T: FromParam>(req: &Request, name: &str) -> Result<Option<T>, DecodeError> {
    let invalid = |source: BoxError| DecodeError::InvalidHeader {
        name: name.to_owned(),
        expected: label::<T>(),
        source,
    };

    match req.header(name) {
        None => Ok(None),
        Some(Err(_)) => Err(invalid("header value is not visible ASCII".into())),
        Some(Ok(raw)) => T::from_param(raw).map(Some).map_err(|err| invalid(err.into())),
    }
}

// ── Body ──────────────────────────────────────────────────────────────────────

/// The raw body bytes, empty if the request had none.
pub fn bytes() -> Endpoint<Bytes> {
    Endpoint::new(|input| {
        let body = input.request().body().cloned().unwrap_or_default();
        DecodeResult::Matched(body, input)
    })
}

/// A required JSON body.
pub fn body<T>() -> Endpoint<T>
where
    T: DeserializeOwned + 'static,
{
    body_with(Arc::new(Json))
}

/// An optional JSON body. A body that is present but malformed is an error.
pub fn body_opt<T>() -> Endpoint<Option<T>>
where
    T: DeserializeOwned + 'static,
{
    let codec: Arc<dyn Codec> = Arc::new(Json);
    Endpoint::new(move |input| match input.request().body() {
        None => DecodeResult::Matched(None, input),
        Some(bytes) => match decode_body::<T>(&*codec, bytes) {
            Ok(value) => DecodeResult::Matched(Some(value), input),
            Err(err) => DecodeResult::Error(err),
        },
    })
}

/// A required body decoded by the given codec.
pub fn body_with<T>(codec: Arc<dyn Codec>) -> Endpoint<T>
where
    T: DeserializeOwned + 'static,
{
    Endpoint::new(move |input| match input.request().body() {
        None => DecodeResult::Error(DecodeError::MissingBody),
        Some(bytes) => match decode_body::<T>(&*codec, bytes) {
            Ok(value) => DecodeResult::Matched(value, input),
            Err(err) => DecodeResult::Error(err),
        },
    })
}

fn decode_body<T: DeserializeOwned>(codec: &dyn Codec, bytes: &[u8]) -> Result<T, DecodeError> {
    let decode = || -> Result<T, BoxError> {
        let value = codec.decode(bytes)?;
        Ok(serde_json::from_value(value)?)
    };
    decode().map_err(|source| DecodeError::InvalidBody { source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{HeaderName, HeaderValue};
    use serde::Deserialize;
    use uuid::Uuid;

    fn get(uri: &str) -> Request {
        Request::builder().uri(uri).build()
    }

    #[test]
    fn literal_segments_consume_input() {
        let req = get("/todos/42");
        let result = path("todos").decode(Input::new(&req));

        match result {
            DecodeResult::Matched((), rest) => assert_eq!(rest.remaining(), ["42"]),
            other => panic!("expected a match, got {other:?}"),
        }

        assert!(matches!(path("users").decode(Input::new(&req)), DecodeResult::NotMatched));
        assert!(matches!(path("todos").decode(Input::new(&get("/"))), DecodeResult::NotMatched));
    }

    #[test]
    fn typed_segments_distinguish_missing_from_malformed() {
        let id = Uuid::new_v4();
        let req = get(&format!("/{id}"));
        assert_eq!(segment::<Uuid>().decode(Input::new(&req)).value(), Some(id));

        let req = get("/");
        assert!(matches!(segment::<Uuid>().decode(Input::new(&req)), DecodeResult::NotMatched));

        let req = get("/not-a-uuid");
        match segment::<Uuid>().decode(Input::new(&req)) {
            DecodeResult::Error(err @ DecodeError::InvalidSegment { .. }) => {
                assert_eq!(err.to_string(), "path segment `not-a-uuid` is not a valid Uuid");
            }
            other => panic!("expected a decode error, got {other:?}"),
        }

        let req = get("/-12");
        assert_eq!(segment::<i64>().decode(Input::new(&req)).value(), Some(-12));
        assert!(matches!(
            segment::<u8>().decode(Input::new(&req)),
            DecodeResult::Error(DecodeError::InvalidSegment { .. })
        ));
    }

    #[test]
    fn rest_and_end() {
        let req = get("/static/css/site.css");
        let input = Input::new(&req);

        assert!(matches!(end().decode(input), DecodeResult::NotMatched));

        match rest().decode(input) {
            DecodeResult::Matched(segments, rest) => {
                assert_eq!(segments, ["static", "css", "site.css"]);
                assert!(rest.is_exhausted());
                assert!(end().decode(rest).is_matched());
            }
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn method_filter() {
        let req = Request::builder().method(Method::POST).uri("/todos").build();
        assert!(method(Method::POST).decode(Input::new(&req)).is_matched());
        assert!(!method(Method::GET).decode(Input::new(&req)).is_matched());
    }

    #[test]
    fn query_parameters() {
        let req = get("/?limit=10&tag=a&tag=b&page=x");
        let input = Input::new(&req);

        assert_eq!(query::<u32>("limit").decode(input).value(), Some(10));
        assert_eq!(query_opt::<u32>("offset").decode(input).value(), Some(None));
        assert_eq!(
            query_all::<String>("tag").decode(input).value(),
            Some(vec!["a".to_owned(), "b".to_owned()])
        );
        assert_eq!(query_all::<String>("none").decode(input).value(), Some(Vec::new()));

        assert!(matches!(
            query::<u32>("offset").decode(input),
            DecodeResult::Error(DecodeError::MissingParam(name)) if name == "offset"
        ));
        assert!(matches!(
            query_opt::<u32>("page").decode(input),
            DecodeResult::Error(DecodeError::InvalidParam { .. })
        ));
        assert!(matches!(
            query_all::<u32>("tag").decode(input),
            DecodeResult::Error(DecodeError::InvalidParam { .. })
        ));
    }

    #[test]
    fn query_does_not_consume_path() {
        let req = get("/todos?limit=1");
        match query::<u32>("limit").decode(Input::new(&req)) {
            DecodeResult::Matched(1, rest) => assert_eq!(rest.remaining(), ["todos"]),
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[test]
    fn headers() {
        let req = Request::builder()
            .header(HeaderName::from_static("x-tenant"), HeaderValue::from_static("7"))
            .header(HeaderName::from_static("x-raw"), HeaderValue::from_bytes(b"caf\xe9").unwrap())
            .build();
        let input = Input::new(&req);

        assert_eq!(header::<u64>("X-Tenant").decode(input).value(), Some(7));
        assert_eq!(header_opt::<u64>("x-missing").decode(input).value(), Some(None));
        assert!(matches!(
            header::<u64>("x-missing").decode(input),
            DecodeResult::Error(DecodeError::MissingHeader(_))
        ));
        assert!(matches!(
            header::<String>("x-raw").decode(input),
            DecodeResult::Error(DecodeError::InvalidHeader { .. })
        ));
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct NewTodo {
        title: String,
    }

    #[test]
    fn json_bodies() {
        let req = Request::builder().body(r#"{"title":"test"}"#).build();
        assert_eq!(
            body::<NewTodo>().decode(Input::new(&req)).value(),
            Some(NewTodo { title: "test".into() })
        );

        let req = get("/");
        assert!(matches!(
            body::<NewTodo>().decode(Input::new(&req)),
            DecodeResult::Error(DecodeError::MissingBody)
        ));
        assert_eq!(body_opt::<NewTodo>().decode(Input::new(&req)).value(), Some(None));
        assert_eq!(bytes().decode(Input::new(&req)).value(), Some(Bytes::new()));

        let req = Request::builder().body(r#"{"name":"test"}"#).build();
        match body::<NewTodo>().decode(Input::new(&req)) {
            DecodeResult::Error(err @ DecodeError::InvalidBody { .. }) => {
                // The detail is kept for logs, not for the client.
                assert_eq!(err.to_string(), "malformed request body");
                let source = std::error::Error::source(&err).unwrap().to_string();
                assert!(source.contains("missing field `title`"), "{source}");
            }
            other => panic!("expected a decode error, got {other:?}"),
        }

        let req = Request::builder().body("{not json").build();
        assert!(matches!(
            body_opt::<NewTodo>().decode(Input::new(&req)),
            DecodeResult::Error(DecodeError::InvalidBody { .. })
        ));
    }

    #[test]
    fn all_decode_errors_are_bad_requests() {
        assert_eq!(DecodeError::MissingBody.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            DecodeError::Validation { rule: "x".into() }.status(),
            StatusCode::BAD_REQUEST
        );
    }
}
