//! Counters and histograms.
//!
//! Components never reach for a global recorder on their own; they are
//! handed an `Arc<dyn Stats>` and ask it for [`metrics`] handles by name.
//!
//! | Name | Kind |
//! |---|---|
//! | `admission.admitted` | counter |
//! | `admission.rejected` | counter |
//! | `admission.queued` | counter |
//! | `admission.queue_wait_seconds` | histogram |
//! | `request.completed` | counter |
//! | `request.latency_seconds` | histogram |
//! | `output.failure` | counter |

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use metrics::{Counter, Histogram, HistogramFn};

pub const ADMITTED: &str = "admission.admitted";
pub const REJECTED: &str = "admission.rejected";
pub const QUEUED: &str = "admission.queued";
pub const QUEUE_WAIT: &str = "admission.queue_wait_seconds";
pub const COMPLETED: &str = "request.completed";
pub const LATENCY: &str = "request.latency_seconds";
pub const FAILURE: &str = "output.failure";

/// A source of named metric handles.
pub trait Stats: Send + Sync + 'static {
    fn counter(&self, name: &'static str) -> Counter;
    fn histogram(&self, name: &'static str) -> Histogram;
}

/// Forwards to whatever recorder is installed in the process
/// (`metrics::set_global_recorder`), or nowhere if none is.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalStats;

impl Stats for GlobalStats {
    fn counter(&self, name: &'static str) -> Counter {
        metrics::counter!(name)
    }

    fn histogram(&self, name: &'static str) -> Histogram {
        metrics::histogram!(name)
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStats;

impl Stats for NoopStats {
    fn counter(&self, _name: &'static str) -> Counter {
        Counter::noop()
    }

    fn histogram(&self, _name: &'static str) -> Histogram {
        Histogram::noop()
    }
}

/// Keeps every value in memory, readable back by name.
#[derive(Debug, Default)]
pub struct MemoryStats {
    counters: RwLock<HashMap<&'static str, Arc<AtomicU64>>>,
    histograms: RwLock<HashMap<&'static str, Arc<Samples>>>,
}

#[derive(Debug, Default)]
struct Samples(Mutex<Vec<f64>>);

impl HistogramFn for Samples {
    fn record(&self, value: f64) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(value);
    }
}

impl MemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter; `0` if it was never touched.
    pub fn counter_value(&self, name: &str) -> u64 {
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        counters.get(name).map_or(0, |c| c.load(Ordering::Acquire))
    }

    /// Every value recorded on a histogram, in recording order.
    pub fn histogram_samples(&self, name: &str) -> Vec<f64> {
        let histograms = self.histograms.read().unwrap_or_else(PoisonError::into_inner);
        histograms.get(name).map_or_else(Vec::new, |h| {
            h.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
        })
    }

    fn slot<V: Default>(
        map: &RwLock<HashMap<&'static str, Arc<V>>>,
        name: &'static str,
    ) -> Arc<V> {
        if let Some(existing) = map.read().unwrap_or_else(PoisonError::into_inner).get(name) {
            return Arc::clone(existing);
        }
        let mut map = map.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(name).or_default())
    }
}

impl Stats for MemoryStats {
    fn counter(&self, name: &'static str) -> Counter {
        Counter::from_arc(Self::slot(&self.counters, name))
    }

    fn histogram(&self, name: &'static str) -> Histogram {
        Histogram::from_arc(Self::slot(&self.histograms, name))
    }
}
