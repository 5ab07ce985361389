//! Turns an [`Output`] into the response the transport writes.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::StatusCode;
use metrics::Counter;
use serde_json::json;
use tracing::{debug, error, field};

use crate::codec::Codec;
use crate::output::{Content, Failure, Output};
use crate::stats::{self, Stats};

/// Renders outputs with one codec.
///
/// Failures are reported here, once, right before they leave the process:
/// the client sees `{"message": ...}` and nothing else, while the cause goes
/// to the log.
pub struct Mapper {
    codec: Arc<dyn Codec>,
    failures: Counter,
}

impl Mapper {
    pub fn new(codec: Arc<dyn Codec>, stats: &dyn Stats) -> Self {
        Self { codec, failures: stats.counter(stats::FAILURE) }
    }

    pub fn render(&self, output: Output) -> http::Response<Bytes> {
        let (status, headers, content) = output.into_parts();

        let body = match content {
            Content::Empty => Bytes::new(),
            Content::Payload(value) => match self.codec.encode(&value) {
                Ok(body) => body,
                Err(err) => {
                    let failure = Failure::internal().with_cause(err);
                    return self.render(Output::failure(failure));
                }
            },
            Content::Failure(failure) => {
                self.report(status, &failure);
                self.codec
                    .encode(&json!({ "message": failure.message() }))
                    .unwrap_or_default()
            }
        };

        let has_body = !body.is_empty();
        let mut response = http::Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;

        if has_body {
            if let Ok(content_type) = HeaderValue::from_str(self.codec.content_type()) {
                response.headers_mut().entry(CONTENT_TYPE).or_insert(content_type);
            }
        }
        response
    }

    fn report(&self, status: StatusCode, failure: &Failure) {
        self.failures.increment(1);
        let cause = failure.cause().map(field::display);
        if status.is_server_error() {
            error!(status = status.as_u16(), message = failure.message(), cause, "request failed");
        } else {
            debug!(status = status.as_u16(), message = failure.message(), cause, "request refused");
        }
    }
}

impl std::fmt::Debug for Mapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapper")
            .field("content_type", &self.codec.content_type())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Json;
    use crate::error::BoxError;
    use crate::stats::MemoryStats;
    use http::header::LOCATION;
    use serde_json::Value;

    fn mapper() -> (Mapper, Arc<MemoryStats>) {
        let stats = Arc::new(MemoryStats::new());
        (Mapper::new(Arc::new(Json), stats.as_ref()), stats)
    }

    fn body(response: &http::Response<Bytes>) -> Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    #[test]
    fn payloads_are_encoded() {
        let (mapper, _) = mapper();
        let response = mapper.render(
            Output::created(json!({ "id": 1, "title": "test" }))
                .with_header(LOCATION, HeaderValue::from_static("/todos/1")),
        );

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()[LOCATION], "/todos/1");
        assert_eq!(body(&response), json!({ "id": 1, "title": "test" }));
    }

    #[test]
    fn empty_outputs_have_no_body() {
        let (mapper, _) = mapper();
        let response = mapper.render(Output::no_content());
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.body().is_empty());
        assert!(response.headers().get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn failures_hide_their_cause() {
        let (mapper, stats) = mapper();
        let failure = Failure::from(std::io::Error::other("password=hunter2"));
        let response = mapper.render(Output::failure(failure));

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body(&response), json!({ "message": "internal server error" }));
        assert_eq!(stats.counter_value(stats::FAILURE), 1);
    }

    #[test]
    fn overridden_failure_status_wins() {
        let (mapper, _) = mapper();
        let response = mapper.render(
            Output::failure(Failure::bad_request("title is required"))
                .with_status(StatusCode::UNPROCESSABLE_ENTITY),
        );
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body(&response), json!({ "message": "title is required" }));
    }

    struct Broken;

    impl Codec for Broken {
        fn content_type(&self) -> &'static str { "application/broken" }

        fn encode(&self, value: &Value) -> Result<Bytes, BoxError> {
            match value.get("message") {
                Some(_) => Json.encode(value),
                None => Err("encoder exploded".into()),
            }
        }

        fn decode(&self, bytes: &[u8]) -> Result<Value, BoxError> {
            Json.decode(bytes)
        }
    }

    #[test]
    fn encode_failures_become_internal_failures() {
        let stats = MemoryStats::new();
        let mapper = Mapper::new(Arc::new(Broken), &stats);
        let response = mapper.render(Output::ok(json!({ "id": 1 })));

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body(&response), json!({ "message": "internal server error" }));
        assert_eq!(stats.counter_value(stats::FAILURE), 1);
    }
}
