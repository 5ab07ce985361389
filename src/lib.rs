//! # turnstile
//!
//! Composable request decoding, output mapping and admission control for
//! HTTP services.
//!
//! A service is one [`Endpoint`]: small decoders for path segments, query
//! parameters, headers and bodies, glued together with `then`, `map` and
//! `or`, and finished with an async compute step. The [`Dispatcher`] runs
//! every request through the same lifecycle:
//!
//! 1. **Admit.** Take a concurrency slot, wait in a bounded FIFO queue, or be
//!    rejected with `503`. The request body is only read once admitted.
//! 2. **Decode.** No route matches → `404`; a route matches but its input is
//!    malformed → `400`, and no other route is tried.
//! 3. **Compute.** Run the handler; errors and panics become `500`.
//! 4. **Release** the slot, then **render** the [`Output`] through a codec.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use serde::Deserialize;
//! use turnstile::decode::{body, path, segment};
//! use turnstile::endpoint::{get, post};
//! use turnstile::{Admission, AdmissionConfig, Dispatcher, GlobalStats, Output, Router, Server};
//!
//! #[derive(Deserialize)]
//! struct NewTodo { title: String }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), turnstile::Error> {
//!     let app = Router::new()
//!         .route(get(path("todos").with(segment::<u64>()))
//!             .handle(|id: u64| async move { Output::ok(serde_json::json!({ "id": id })) }))
//!         .route(post(path("todos")).with(body::<NewTodo>())
//!             .handle(|todo: NewTodo| async move {
//!                 Output::created(serde_json::json!({ "id": 1, "title": todo.title }))
//!             }));
//!
//!     let stats = Arc::new(GlobalStats);
//!     let admission = Admission::new(
//!         AdmissionConfig::unbounded().with_max_concurrent(64).with_max_waiters(128),
//!         stats.clone(),
//!     );
//!     let dispatcher = Dispatcher::new(app.into_endpoint(), admission, stats);
//!
//!     Server::bind("0.0.0.0:3000").await?.serve(dispatcher).await
//! }
//! ```

mod admission;
mod codec;
mod config;
mod dispatch;
mod error;
mod handler;
mod mapper;
mod output;
mod request;
mod router;
mod server;
pub mod stats;

pub mod decode;
pub mod endpoint;

pub use admission::{Admission, Permit, Rejected};
pub use codec::{Codec, Json};
pub use config::{AdmissionConfig, ServerConfig};
pub use decode::{DecodeError, DecodeResult, FromParam, Input};
pub use dispatch::Dispatcher;
pub use endpoint::Endpoint;
pub use error::{BoxError, Error};
pub use handler::{Compute, Handler};
pub use mapper::Mapper;
pub use output::{Content, Failure, IntoOutput, Output};
pub use request::{Request, RequestBuilder};
pub use router::Router;
pub use server::Server;
pub use stats::{GlobalStats, MemoryStats, NoopStats, Stats};
