//! Endpoint outputs and the [`IntoOutput`] conversion trait.
//!
//! An [`Output`] is what a compute step hands back before anything touches
//! the wire: a payload, an empty acknowledgement or a failure, each with a
//! status. The conventional statuses are defaults; every constructor can be
//! overridden with [`Output::with_status`].
//!
//! | Constructor | Status |
//! |---|---|
//! | [`Output::created`] | 201 |
//! | [`Output::ok`] | 200 |
//! | [`Output::accepted`] | 202 |
//! | [`Output::no_content`] | 204 |
//! | [`Output::failure`] | the failure's status, 500 unless classified |

use std::fmt;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::decode::DecodeError;
use crate::error::BoxError;

// ── Output ────────────────────────────────────────────────────────────────────

/// The result of a compute step.
#[derive(Debug)]
pub struct Output {
    status: StatusCode,
    headers: HeaderMap,
    content: Content,
}

/// What an [`Output`] carries.
#[derive(Debug)]
pub enum Content {
    /// A value for the codec to serialize.
    Payload(Value),
    /// No body.
    Empty,
    /// Only the failure's message is ever serialized.
    Failure(Failure),
}

impl Output {
    /// A payload with an explicit status.
    ///
    /// The value is captured as JSON right away. If it cannot be represented
    /// (for instance a map with non-string keys) the output becomes a 500
    /// failure carrying the serializer's error as its cause.
    pub fn payload(value: impl Serialize, status: StatusCode) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => Self::with_content(status, Content::Payload(value)),
            Err(err) => Self::failure(Failure::from(err)),
        }
    }

    /// `200 OK` payload, for reads and updates.
    pub fn ok(value: impl Serialize) -> Self {
        Self::payload(value, StatusCode::OK)
    }

    /// `201 Created` payload.
    pub fn created(value: impl Serialize) -> Self {
        Self::payload(value, StatusCode::CREATED)
    }

    /// No body with an explicit status.
    pub fn empty(status: StatusCode) -> Self {
        Self::with_content(status, Content::Empty)
    }

    /// `202 Accepted`, no body.
    pub fn accepted() -> Self {
        Self::empty(StatusCode::ACCEPTED)
    }

    /// `204 No Content`.
    pub fn no_content() -> Self {
        Self::empty(StatusCode::NO_CONTENT)
    }

    pub fn failure(failure: Failure) -> Self {
        Self::with_content(failure.status, Content::Failure(failure))
    }

    /// Overrides the default status. The status table is a convention, not a
    /// constraint, so any code is accepted.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn content(&self) -> &Content { &self.content }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Content) {
        (self.status, self.headers, self.content)
    }

    fn with_content(status: StatusCode, content: Content) -> Self {
        Self { status, headers: HeaderMap::new(), content }
    }
}

// ── Failure ───────────────────────────────────────────────────────────────────

/// A classified error: a status, a message safe to show the client, and an
/// optional cause that is only ever logged.
///
/// Any `std::error::Error` converts into a `500` failure, so `?` works inside
/// compute steps:
///
/// ```rust
/// use turnstile::{Failure, Output};
///
/// async fn load(raw: String) -> Result<Output, Failure> {
///     let n: u64 = raw.parse()?; // ParseIntError -> 500, cause logged
///     Ok(Output::ok(n))
/// }
/// ```
///
/// `Failure` deliberately does not implement `std::error::Error` itself;
/// that is what makes the blanket conversion above coherent.
pub struct Failure {
    status: StatusCode,
    message: String,
    cause: Option<BoxError>,
}

impl Failure {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), cause: None }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    /// `500` with a generic message.
    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }

    /// A request that matched a route but could not be decoded. A body
    /// decoder's own error becomes the cause.
    pub fn invalid(err: DecodeError) -> Self {
        let failure = Self::new(err.status(), err.to_string());
        match err {
            DecodeError::InvalidBody { source } => failure.with_cause(source),
            _ => failure,
        }
    }

    /// Attaches the underlying error. It is logged, never sent.
    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn message(&self) -> &str { &self.message }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

impl<E> From<E> for Failure
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::internal().with_cause(err)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("status", &self.status)
            .field("message", &self.message)
            .field("cause", &self.cause)
            .finish()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " ({cause})")?;
        }
        Ok(())
    }
}

// ── IntoOutput ────────────────────────────────────────────────────────────────

/// Conversion into an [`Output`], implemented by everything a compute step
/// may resolve to.
pub trait IntoOutput {
    fn into_output(self) -> Output;
}

impl IntoOutput for Output {
    fn into_output(self) -> Output { self }
}

impl IntoOutput for Failure {
    fn into_output(self) -> Output { Output::failure(self) }
}

/// `()` acknowledges with `204 No Content`.
impl IntoOutput for () {
    fn into_output(self) -> Output { Output::no_content() }
}

/// Error classes become failures with the canonical reason as message;
/// everything else becomes an empty output.
impl IntoOutput for StatusCode {
    fn into_output(self) -> Output {
        if self.is_client_error() || self.is_server_error() {
            let reason = self.canonical_reason().unwrap_or("error");
            Output::failure(Failure::new(self, reason.to_ascii_lowercase()))
        } else {
            Output::empty(self)
        }
    }
}

/// `Err` is a compute failure; it becomes a failure output, `500` unless the
/// error was classified as a [`Failure`] with another status.
impl<O, E> IntoOutput for Result<O, E>
where
    O: IntoOutput,
    E: Into<Failure>,
{
    fn into_output(self) -> Output {
        match self {
            Ok(out) => out.into_output(),
            Err(err) => Output::failure(err.into()),
        }
    }
}
