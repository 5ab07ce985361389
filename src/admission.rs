//! Admission control: a concurrency limit with a bounded FIFO wait queue.
//!
//! Every request asks the controller for a [`Permit`] before its endpoint is
//! evaluated:
//!
//! 1. A free slot admits it at once.
//! 2. Otherwise, if fewer than `max_waiters` requests are queued, it joins the
//!    back of the queue and waits up to `queue_timeout` for a slot.
//! 3. Otherwise it is rejected immediately and the queue is left untouched.
//!
//! Slots are handed over in arrival order: [`tokio::sync::Semaphore`] is
//! fair, so a released permit goes to the longest waiter and newcomers cannot
//! take it first.
//!
//! Releasing is tied to [`Permit`]'s `Drop`. Whether the request completes,
//! fails, panics or is cancelled because the client went away, the slot is
//! returned exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use http::StatusCode;
use metrics::{Counter, Histogram};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, warn};

use crate::config::AdmissionConfig;
use crate::output::{Failure, Output};
use crate::stats::{self, Stats};

/// Why a request was not admitted. Every variant is a `503`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejected {
    /// Every slot is busy and the queue is full.
    #[error("service overloaded")]
    Overloaded,

    /// Queued, but no slot freed up in time.
    #[error("queue timeout")]
    QueueTimeout,

    /// The controller was closed for shutdown.
    #[error("shutting down")]
    Closed,
}

impl Rejected {
    pub fn status(&self) -> StatusCode {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

impl From<Rejected> for Output {
    fn from(rejected: Rejected) -> Self {
        Output::failure(Failure::unavailable(rejected.to_string()))
    }
}

const MIN_QUEUE_TIMEOUT_MS: u64 = 1;

/// The admission controller. Cheap to clone; clones share one gate.
#[derive(Clone)]
pub struct Admission {
    inner: Arc<Inner>,
}

struct Inner {
    config: AdmissionConfig,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    in_flight: AtomicUsize,
    waiting: AtomicUsize,
    admitted: Counter,
    rejected: Counter,
    queued: Counter,
    queue_wait: Histogram,
}

impl Admission {
    /// Builds a gate from `config`.
    ///
    /// A `queue_timeout_ms` of `0` is raised to `1`, the shortest wait that
    /// still lets a released slot reach a queued request.
    pub fn new(mut config: AdmissionConfig, stats: Arc<dyn Stats>) -> Self {
        if config.queue_timeout_ms == Some(0) {
            warn!("admission queue timeout of 0ms raised to 1ms");
            config.queue_timeout_ms = Some(MIN_QUEUE_TIMEOUT_MS);
        }
        let max_concurrent = config
            .max_concurrent
            .unwrap_or(Semaphore::MAX_PERMITS)
            .min(Semaphore::MAX_PERMITS);

        Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(max_concurrent)),
                max_concurrent,
                in_flight: AtomicUsize::new(0),
                waiting: AtomicUsize::new(0),
                admitted: stats.counter(stats::ADMITTED),
                rejected: stats.counter(stats::REJECTED),
                queued: stats.counter(stats::QUEUED),
                queue_wait: stats.histogram(stats::QUEUE_WAIT),
                config,
            }),
        }
    }

    /// A controller that admits everything.
    pub fn unbounded() -> Self {
        Self::new(AdmissionConfig::unbounded(), Arc::new(stats::NoopStats))
    }

    /// Waits for a slot.
    ///
    /// Dropping the returned future while queued leaves the queue cleanly.
    pub async fn acquire(&self) -> Result<Permit, Rejected> {
        let inner = &self.inner;

        match Arc::clone(&inner.semaphore).try_acquire_owned() {
            Ok(permit) => return Ok(self.admit(permit)),
            Err(TryAcquireError::Closed) => return Err(self.reject(Rejected::Closed)),
            Err(TryAcquireError::NoPermits) => {}
        }

        let Some(slot) = WaitSlot::claim(&inner.waiting, inner.config.max_waiters) else {
            debug!(
                in_flight = self.in_flight(),
                waiting = self.waiting(),
                "admission queue full"
            );
            return Err(self.reject(Rejected::Overloaded));
        };
        inner.queued.increment(1);
        debug!(waiting = self.waiting(), "request queued");

        let started = Instant::now();
        let acquire = Arc::clone(&inner.semaphore).acquire_owned();
        let outcome = match inner.config.queue_timeout() {
            Some(limit) => match tokio::time::timeout(limit, acquire).await {
                Ok(acquired) => acquired.map_err(|_| Rejected::Closed),
                Err(_) => Err(Rejected::QueueTimeout),
            },
            None => acquire.await.map_err(|_| Rejected::Closed),
        };
        drop(slot);
        inner.queue_wait.record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(permit) => Ok(self.admit(permit)),
            Err(Rejected::QueueTimeout) => {
                warn!(
                    waited_ms = started.elapsed().as_millis() as u64,
                    in_flight = self.in_flight(),
                    "request timed out in admission queue"
                );
                Err(self.reject(Rejected::QueueTimeout))
            }
            Err(other) => Err(self.reject(other)),
        }
    }

    /// Rejects queued waiters and every later arrival with
    /// [`Rejected::Closed`]. Permits already held drain normally.
    pub fn close(&self) {
        self.inner.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.semaphore.is_closed()
    }

    /// Requests currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Requests currently queued.
    pub fn waiting(&self) -> usize {
        self.inner.waiting.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.inner.config
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> Permit {
        let in_flight = self.inner.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert!(in_flight <= self.inner.max_concurrent);
        self.inner.admitted.increment(1);
        Permit { inner: Arc::clone(&self.inner), _permit: permit }
    }

    fn reject(&self, reason: Rejected) -> Rejected {
        self.inner.rejected.increment(1);
        debug!(%reason, "request rejected");
        reason
    }
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("config", &self.inner.config)
            .field("in_flight", &self.in_flight())
            .field("waiting", &self.waiting())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A held concurrency slot. Dropping it releases the slot.
#[must_use = "dropping a permit releases its slot immediately"]
pub struct Permit {
    inner: Arc<Inner>,
    // Dropped after `Drop::drop` runs, so `in_flight` is decremented before
    // the slot can be handed to a waiter.
    _permit: OwnedSemaphorePermit,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit").finish_non_exhaustive()
    }
}

/// A place in the wait queue, counted in `waiting` for as long as it lives.
struct WaitSlot<'a> {
    waiting: &'a AtomicUsize,
}

impl<'a> WaitSlot<'a> {
    fn claim(waiting: &'a AtomicUsize, max: usize) -> Option<Self> {
        waiting
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| Self { waiting })
    }
}

impl Drop for WaitSlot<'_> {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::AcqRel);
    }
}
