//! Endpoint algebra.
//!
//! An [`Endpoint<T>`] is an immutable, shareable decode function. Small
//! endpoints from [`decode`](crate::decode) are glued together with
//! [`then`](Endpoint::then), [`map`](Endpoint::map) and [`or`](Endpoint::or)
//! into a whole route, and [`handle`](Endpoint::handle) attaches the async
//! compute step that produces an [`Output`](crate::Output).
//!
//! ```rust
//! use turnstile::decode::{path, segment};
//! use turnstile::endpoint::get;
//! use turnstile::Output;
//! use uuid::Uuid;
//!
//! let show = get(path("todos").with(segment::<Uuid>()))
//!     .handle(|id: Uuid| async move { Output::ok(serde_json::json!({ "id": id })) });
//!
//! let list = get(path("todos"))
//!     .handle(|()| async { Output::ok(serde_json::json!([])) });
//!
//! let routes = show.or(list);
//! # let _ = routes;
//! ```

use std::fmt;
use std::sync::Arc;

use http::Method;
use tracing::debug;

use crate::decode::{self, DecodeError, DecodeResult, Input};
use crate::error::BoxError;
use crate::handler::{Compute, Handler};

type DecodeFn<T> = dyn for<'r> Fn(Input<'r>) -> DecodeResult<'r, T> + Send + Sync;

/// A composable request decoder producing `T`.
///
/// Cloning is one `Arc` increment; the same endpoint serves every request.
pub struct Endpoint<T> {
    decode: Arc<DecodeFn<T>>,
}

impl<T> Clone for Endpoint<T> {
    fn clone(&self) -> Self {
        Self { decode: Arc::clone(&self.decode) }
    }
}

impl<T> fmt::Debug for Endpoint<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint").finish_non_exhaustive()
    }
}

impl<T: 'static> Endpoint<T> {
    /// Wraps a decode function.
    pub fn new<F>(decode: F) -> Self
    where
        F: for<'r> Fn(Input<'r>) -> DecodeResult<'r, T> + Send + Sync + 'static,
    {
        Self { decode: Arc::new(decode) }
    }

    /// Evaluates this endpoint against `input`.
    pub fn decode<'r>(&self, input: Input<'r>) -> DecodeResult<'r, T> {
        (self.decode)(input)
    }

    /// Runs `self`, then `other` on what is left, pairing the values.
    pub fn then<U: 'static>(self, other: Endpoint<U>) -> Endpoint<(T, U)> {
        Endpoint::new(move |input| {
            self.decode(input)
                .and_then(|a, rest| other.decode(rest).map(|b| (a, b)))
        })
    }

    /// Sequencing that keeps only `other`'s value. Handy after `()`-valued
    /// endpoints such as literal path segments.
    pub fn with<U: 'static>(self, other: Endpoint<U>) -> Endpoint<U> {
        self.then(other).map(|(_, b)| b)
    }

    /// Sequencing that keeps only `self`'s value.
    pub fn skip<U: 'static>(self, other: Endpoint<U>) -> Endpoint<T> {
        self.then(other).map(|(a, _)| a)
    }

    pub fn map<U, F>(self, f: F) -> Endpoint<U>
    where
        U: 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        Endpoint::new(move |input| self.decode(input).map(&f))
    }

    /// Like [`map`](Self::map) but fallible. An `Err` becomes a
    /// [`DecodeError::Validation`] described by `rule`; the error itself is
    /// only logged.
    ///
    /// ```rust
    /// use turnstile::decode::query;
    ///
    /// let limit = query::<u32>("limit").try_map("limit must fit in a byte", u8::try_from);
    /// # let _ = limit;
    /// ```
    pub fn try_map<U, E, F>(self, rule: impl Into<String>, f: F) -> Endpoint<U>
    where
        U: 'static,
        E: Into<BoxError>,
        F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
    {
        let rule = rule.into();
        Endpoint::new(move |input| {
            self.decode(input).and_then(|value, rest| match f(value) {
                Ok(value) => DecodeResult::Matched(value, rest),
                Err(err) => {
                    let err: BoxError = err.into();
                    debug!(rule = %rule, error = %err, "validation failed");
                    DecodeResult::Error(DecodeError::Validation { rule: rule.clone() })
                }
            })
        })
    }

    /// Rejects matched values failing `predicate` with a validation error
    /// described by `rule`, e.g. `"title must not be empty"`.
    pub fn should<P>(self, rule: impl Into<String>, predicate: P) -> Endpoint<T>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let rule = rule.into();
        Endpoint::new(move |input| {
            self.decode(input).and_then(|value, rest| {
                if predicate(&value) {
                    DecodeResult::Matched(value, rest)
                } else {
                    DecodeResult::Error(DecodeError::Validation { rule: rule.clone() })
                }
            })
        })
    }

    /// Left-biased alternation.
    ///
    /// `other` is tried against the original input only when `self` does not
    /// match. A decode error from `self` is final.
    pub fn or(self, other: Endpoint<T>) -> Endpoint<T> {
        Endpoint::new(move |input| match self.decode(input) {
            DecodeResult::NotMatched => other.decode(input),
            decided => decided,
        })
    }

    /// Attaches the compute step.
    ///
    /// The resulting endpoint only matches when the whole path was consumed;
    /// the compute future is created on a match but not polled until the
    /// dispatcher runs it.
    pub fn handle<H>(self, handler: H) -> Endpoint<Compute>
    where
        H: Handler<T>,
    {
        Endpoint::new(move |input| match self.decode(input) {
            DecodeResult::Matched(value, rest) if rest.is_exhausted() => {
                DecodeResult::Matched(handler.compute(value), rest)
            }
            DecodeResult::Matched(..) => DecodeResult::NotMatched,
            DecodeResult::NotMatched => DecodeResult::NotMatched,
            DecodeResult::Error(err) => DecodeResult::Error(err),
        })
    }
}

// ── Method-anchored routes ────────────────────────────────────────────────────

/// Anchors a path pattern to a method: the method must match and the pattern
/// must consume the whole path before anything chained after it runs.
pub fn route<T: 'static>(method: Method, path: Endpoint<T>) -> Endpoint<T> {
    decode::method(method).with(path).skip(decode::end())
}

macro_rules! method_route {
    ($($name:ident => $method:ident),* $(,)?) => {$(
        #[doc = concat!("[`route`] for `", stringify!($method), "`.")]
        pub fn $name<T: 'static>(path: Endpoint<T>) -> Endpoint<T> {
            route(Method::$method, path)
        }
    )*};
}

method_route! {
    get => GET,
    post => POST,
    put => PUT,
    patch => PATCH,
    delete => DELETE,
    head => HEAD,
}
