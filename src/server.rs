//! HTTP transport and graceful shutdown.
//!
//! The server owns sockets and nothing else. Each hyper request is handed to
//! the [`Dispatcher`] as its head plus a body that is read only after the
//! request is admitted; whatever comes back is written out.
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C (or the future given to
//! [`Server::serve_with_shutdown`]) the server:
//! 1. Stops `listener.accept()`, so no new connections are made.
//! 2. Closes the admission gate: queued requests and new arrivals on open
//!    connections get `503 shutting down`.
//! 3. Asks every connection to finish its in-flight request and close.
//! 4. Returns once every connection task has finished.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::{DEFAULT_MAX_BODY_BYTES, ServerConfig};
use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::output::Failure;

/// A bound HTTP server.
pub struct Server {
    listener: TcpListener,
    max_body_bytes: usize,
}

impl Server {
    /// Binds to `addr` (`host:port`) with the default body limit.
    ///
    /// # Errors
    ///
    /// Fails if `addr` is not a socket address or the port cannot be bound.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # async fn run() -> Result<(), turnstile::Error> {
    /// let server = turnstile::Server::bind("0.0.0.0:3000").await?;
    /// # let _ = server;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn bind(addr: &str) -> Result<Self, Error> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("`{addr}` is not a valid socket address")))?;
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, max_body_bytes: DEFAULT_MAX_BODY_BYTES })
    }

    /// Validates `config` and binds to its address.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # async fn run() -> Result<(), turnstile::Error> {
    /// use turnstile::{Server, ServerConfig};
    ///
    /// let config = ServerConfig::new("127.0.0.1:8080").with_max_body_bytes(64 * 1024);
    /// let server = Server::new(&config).await?;
    /// # let _ = server;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(config: &ServerConfig) -> Result<Self, Error> {
        config.validate()?;
        let server = Self::bind(&config.bind_address).await?;
        Ok(server.with_max_body_bytes(config.max_body_bytes))
    }

    /// Largest body read into memory; longer bodies are answered with `413`.
    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves until SIGTERM or Ctrl-C, then drains.
    ///
    /// # Panics
    ///
    /// Panics if the process signal handlers cannot be installed.
    pub async fn serve(self, dispatcher: Dispatcher) -> Result<(), Error> {
        self.serve_with_shutdown(dispatcher, shutdown_signal()).await
    }

    /// Serves until `signal` resolves, then drains.
    pub async fn serve_with_shutdown<F>(self, dispatcher: Dispatcher, signal: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = self.local_addr()?;
        let max_body_bytes = self.max_body_bytes;

        // Every connection task shares the one dispatcher, and with it the
        // one admission gate.
        let dispatcher = Arc::new(dispatcher);

        info!(%addr, max_body_bytes, "turnstile listening");

        // Flipped once on shutdown; every connection task watches it.
        let (draining, _) = watch::channel(false);

        // JoinSet tracks every spawned connection task so the drain below can
        // wait for all of them.
        let mut tasks = tokio::task::JoinSet::new();

        // `select!` polls the signal by reference on every iteration, which
        // needs it pinned in place.
        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Arms are checked top to bottom: a signal stops accepting
                // even if more connections are queued.
                biased;

                () = &mut signal => {
                    info!(connections = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = self.listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!(error = %e, "accept error");
                            continue;
                        }
                    };

                    let dispatcher = Arc::clone(&dispatcher);
                    let mut draining = draining.subscribe();
                    // TokioIo adapts tokio's AsyncRead/AsyncWrite to the hyper
                    // IO traits.
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection, not once
                        // per connection.
                        let svc = service_fn(move |req| {
                            let dispatcher = Arc::clone(&dispatcher);
                            async move { Ok::<_, Infallible>(handle(&dispatcher, max_body_bytes, req).await) }
                        });

                        // `auto::Builder` serves HTTP/1.1 or HTTP/2, whichever
                        // the client speaks.
                        let builder = ConnBuilder::new(TokioExecutor::new());
                        let conn = builder.serve_connection(io, svc);
                        // `graceful_shutdown` takes `Pin<&mut Self>`, and the
                        // connection is polled again afterwards.
                        tokio::pin!(conn);

                        let res = tokio::select! {
                            res = conn.as_mut() => res,
                            _ = draining.changed() => {
                                // Finishes the in-flight request, then closes
                                // instead of waiting on keep-alive.
                                conn.as_mut().graceful_shutdown();
                                conn.await
                            }
                        };
                        if let Err(e) = res {
                            debug!(%peer, error = %e, "connection closed with error");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Close before signalling connections so that nothing they still
        // read can be admitted.
        dispatcher.admission().close();
        draining.send_replace(true);

        while tasks.join_next().await.is_some() {}

        info!("turnstile stopped");
        Ok(())
    }
}

// ── Request handling ──────────────────────────────────────────────────────────

/// Dispatches one hyper request.
///
/// The body is buffered, up to `max_body_bytes`, only after admission. A body
/// over the limit is answered with `413`; one that cannot be read with `400`.
/// The error type is [`Infallible`]: every failure is already a response by
/// the time hyper sees it.
async fn handle(
    dispatcher: &Dispatcher,
    max_body_bytes: usize,
    req: hyper::Request<Incoming>,
) -> http::Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();
    let body = read_body(body, max_body_bytes);
    dispatcher.dispatch_parts(parts, body).await.map(Full::new)
}

async fn read_body(body: Incoming, max_bytes: usize) -> Result<Bytes, Failure> {
    match Limited::new(body, max_bytes).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.is::<LengthLimitError>() => Err(Failure::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("request body exceeds {max_bytes} bytes"),
        )),
        Err(err) => Err(Failure::bad_request("unreadable request body").with_cause(err)),
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives: SIGTERM or
/// SIGINT on Unix, Ctrl-C elsewhere.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    // Never resolves, so only Ctrl-C can fire off Unix.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
