//! The request lifecycle: admit, decode, compute, release, render.

use std::any::Any;
use std::future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::FutureExt;
use metrics::{Counter, Histogram};
use tracing::{Instrument, Span, debug, info_span};

use crate::admission::Admission;
use crate::codec::{Codec, Json};
use crate::decode::{DecodeResult, Input};
use crate::endpoint::Endpoint;
use crate::handler::Compute;
use crate::mapper::Mapper;
use crate::output::{Failure, Output};
use crate::request::Request;
use crate::stats::{self, Stats};

/// Runs requests through an endpoint under admission control.
///
/// One dispatcher serves every connection at once: share it behind an
/// `Arc`; every method takes `&self`.
pub struct Dispatcher {
    endpoint: Endpoint<Compute>,
    admission: Admission,
    mapper: Mapper,
    stats: Arc<dyn Stats>,
    completed: Counter,
    latency: Histogram,
}

impl Dispatcher {
    pub fn new(endpoint: Endpoint<Compute>, admission: Admission, stats: Arc<dyn Stats>) -> Self {
        Self {
            mapper: Mapper::new(Arc::new(Json), stats.as_ref()),
            completed: stats.counter(stats::COMPLETED),
            latency: stats.histogram(stats::LATENCY),
            endpoint,
            admission,
            stats,
        }
    }

    /// Replaces the codec used to render payloads. JSON by default.
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.mapper = Mapper::new(codec, self.stats.as_ref());
        self
    }

    pub fn admission(&self) -> &Admission {
        &self.admission
    }

    /// Produces exactly one response for an already buffered `request`.
    ///
    /// Admission comes first: a rejected request never reaches its endpoint.
    /// The admission slot is held until the compute step finishes and is
    /// released before rendering. Dropping the returned future releases it
    /// too, and nothing is rendered.
    pub async fn dispatch(&self, request: Request) -> http::Response<Bytes> {
        let span = info_span!("request", method = %request.method(), path = %request.path());
        self.respond(span, future::ready(Ok(request))).await
    }

    /// Produces exactly one response for a request whose body has not been
    /// read yet.
    ///
    /// `body` is polled only once the request is admitted, so a rejected
    /// request answers `503` without waiting for a single body byte. A body
    /// that resolves to a [`Failure`] is rendered as-is and the slot is
    /// released.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use turnstile::{Admission, Dispatcher, Failure, NoopStats, Router};
    /// # use std::sync::Arc;
    /// # async fn run() {
    /// let dispatcher = Dispatcher::new(Router::new().into_endpoint(), Admission::unbounded(), Arc::new(NoopStats));
    /// let (parts, ()) = http::Request::post("/upload").body(()).unwrap().into_parts();
    ///
    /// let response = dispatcher
    ///     .dispatch_parts(parts, async { Err(Failure::bad_request("truncated body")) })
    ///     .await;
    /// assert_eq!(response.status(), http::StatusCode::BAD_REQUEST);
    /// # }
    /// ```
    pub async fn dispatch_parts<B>(&self, parts: http::request::Parts, body: B) -> http::Response<Bytes>
    where
        B: Future<Output = Result<Bytes, Failure>>,
    {
        let span = info_span!("request", method = %parts.method, path = %parts.uri.path());
        let request = async move { body.await.map(|body| Request::from_parts(parts, body)) };
        self.respond(span, request).await
    }

    /// Renders an output produced outside the endpoint, such as a transport
    /// failure.
    pub fn render(&self, output: Output) -> http::Response<Bytes> {
        self.mapper.render(output)
    }

    async fn respond<R>(&self, span: Span, request: R) -> http::Response<Bytes>
    where
        R: Future<Output = Result<Request, Failure>>,
    {
        let started = Instant::now();

        let output = self.run(request).instrument(span.clone()).await;
        let response = span.in_scope(|| {
            let response = self.mapper.render(output);
            debug!(
                status = response.status().as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "request completed"
            );
            response
        });

        self.latency.record(started.elapsed().as_secs_f64());
        self.completed.increment(1);
        response
    }

    async fn run<R>(&self, request: R) -> Output
    where
        R: Future<Output = Result<Request, Failure>>,
    {
        let permit = match self.admission.acquire().await {
            Ok(permit) => permit,
            Err(rejected) => return rejected.into(),
        };

        let output = match request.await {
            Ok(request) => self.serve(&request).await,
            Err(failure) => Output::failure(failure),
        };

        drop(permit);
        output
    }

    async fn serve(&self, request: &Request) -> Output {
        match self.evaluate(request) {
            Ok(compute) => match AssertUnwindSafe(compute).catch_unwind().await {
                Ok(output) => output,
                Err(panic) => Output::failure(panicked("compute", panic)),
            },
            Err(output) => output,
        }
    }

    fn evaluate(&self, request: &Request) -> Result<Compute, Output> {
        let decoded = panic::catch_unwind(AssertUnwindSafe(|| {
            match self.endpoint.decode(Input::new(request)) {
                DecodeResult::Matched(compute, _) => Ok(compute),
                DecodeResult::NotMatched => Err(Failure::not_found("not found")),
                DecodeResult::Error(err) => Err(Failure::invalid(err)),
            }
        }));

        match decoded {
            Ok(Ok(compute)) => Ok(compute),
            Ok(Err(failure)) => Err(Output::failure(failure)),
            Err(panic) => Err(Output::failure(panicked("decode", panic))),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("endpoint", &self.endpoint)
            .field("admission", &self.admission)
            .field("mapper", &self.mapper)
            .finish_non_exhaustive()
    }
}

fn panicked(stage: &str, payload: Box<dyn Any + Send>) -> Failure {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned());
    Failure::internal().with_cause(format!("{stage} panicked: {message}"))
}
