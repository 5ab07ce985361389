//! Admission guarantees under queueing, failure and concurrency.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::StatusCode;
use proptest::prelude::*;
use turnstile::decode::path;
use turnstile::endpoint::get;
use turnstile::stats::{ADMITTED, QUEUED, REJECTED};
use turnstile::{
    Admission, AdmissionConfig, Dispatcher, Failure, MemoryStats, Output, Rejected, Request, Router,
};

fn gate(config: AdmissionConfig) -> (Admission, Arc<MemoryStats>) {
    let stats = Arc::new(MemoryStats::new());
    (Admission::new(config, stats.clone()), stats)
}

async fn until(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn queue_is_first_in_first_out() {
    let (gate, stats) = gate(AdmissionConfig::unbounded().with_max_concurrent(1).with_max_waiters(2));
    let held = gate.acquire().await.unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut waiters = Vec::new();
    for name in ["first", "second"] {
        let expected = waiters.len() + 1;
        waiters.push(tokio::spawn({
            let gate = gate.clone();
            let order = order.clone();
            async move {
                let _permit = gate.acquire().await.unwrap();
                order.lock().unwrap().push(name);
                tokio::task::yield_now().await;
            }
        }));
        until(|| gate.waiting() == expected).await;
    }

    // Queue full: rejected at once, queue untouched.
    assert_eq!(gate.acquire().await.unwrap_err(), Rejected::Overloaded);
    assert_eq!(gate.waiting(), 2);

    drop(held);
    for waiter in waiters {
        waiter.await.unwrap();
    }

    assert_eq!(*order.lock().unwrap(), ["first", "second"]);
    assert_eq!(gate.in_flight(), 0);
    assert_eq!(gate.waiting(), 0);
    assert_eq!(stats.counter_value(QUEUED), 2);
    assert_eq!(stats.counter_value(ADMITTED), 3);
    assert_eq!(stats.counter_value(REJECTED), 1);
}

#[tokio::test]
async fn saturation_without_queue_rejects_immediately() {
    let (gate, _) = gate(AdmissionConfig::unbounded().with_max_concurrent(2));
    let _a = gate.acquire().await.unwrap();
    let _b = gate.acquire().await.unwrap();

    for _ in 0..10 {
        assert_eq!(gate.acquire().await.unwrap_err(), Rejected::Overloaded);
        assert_eq!(gate.waiting(), 0);
        assert_eq!(gate.in_flight(), 2);
    }
}

/// Routes covering every way a compute step can end.
fn outcomes(started: Arc<AtomicUsize>) -> Router {
    Router::new()
        .route(get(path("ok")).handle(|()| async { Output::no_content() }))
        .route(get(path("fail")).handle(|()| async { Err::<Output, _>(Failure::bad_request("nope")) }))
        .route(get(path("error")).handle(|()| async { Err::<Output, _>(std::io::Error::other("io")) }))
        .route(get(path("panic")).handle(|()| async { None::<Output>.expect("compute panicked") }))
        .route(get(path("hang")).handle(move |()| {
            started.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<Output>()
        }))
}

#[tokio::test]
async fn every_outcome_releases_exactly_once() {
    let started = Arc::new(AtomicUsize::new(0));
    let stats = Arc::new(MemoryStats::new());
    let admission = Admission::new(AdmissionConfig::unbounded().with_max_concurrent(1), stats.clone());
    let dispatcher = Arc::new(Dispatcher::new(
        outcomes(started.clone()).into_endpoint(),
        admission.clone(),
        stats.clone(),
    ));

    for (uri, status) in [
        ("/ok", StatusCode::NO_CONTENT),
        ("/fail", StatusCode::BAD_REQUEST),
        ("/error", StatusCode::INTERNAL_SERVER_ERROR),
        ("/panic", StatusCode::INTERNAL_SERVER_ERROR),
        ("/missing", StatusCode::NOT_FOUND),
    ] {
        let response = dispatcher.dispatch(Request::builder().uri(uri).build()).await;
        assert_eq!(response.status(), status, "{uri}");
        assert_eq!(admission.in_flight(), 0, "{uri}");
    }

    // Cancellation: the client goes away while compute is suspended.
    let hanging = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.dispatch(Request::builder().uri("/hang").build()).await }
    });
    until(|| admission.in_flight() == 1).await;
    assert_eq!(started.load(Ordering::SeqCst), 1);
    hanging.abort();
    assert!(hanging.await.unwrap_err().is_cancelled());
    assert_eq!(admission.in_flight(), 0);

    // Released exactly once: the single slot is free, and there is only one.
    let permit = admission.acquire().await.unwrap();
    assert_eq!(admission.acquire().await.unwrap_err(), Rejected::Overloaded);
    drop(permit);

    assert_eq!(stats.counter_value(ADMITTED), 7);
}

struct Load {
    admitted: usize,
    peak_in_flight: usize,
    peak_waiting: usize,
}

/// Fires `requests` acquisitions at `gate` with seeded arrival and work
/// times while a monitor task samples the counters throughout.
async fn hammer(gate: Admission, requests: usize, seed: u64) -> Load {
    let mut rng = fastrand::Rng::with_seed(seed);
    let done = Arc::new(AtomicBool::new(false));

    let monitor = tokio::spawn({
        let gate = gate.clone();
        let done = done.clone();
        async move {
            let (mut in_flight, mut waiting) = (0, 0);
            while !done.load(Ordering::SeqCst) {
                in_flight = in_flight.max(gate.in_flight());
                waiting = waiting.max(gate.waiting());
                tokio::task::yield_now().await;
            }
            (in_flight, waiting)
        }
    });

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..requests {
        let gate = gate.clone();
        let arrival = Duration::from_micros(rng.u64(0..3_000));
        let work = Duration::from_micros(rng.u64(0..2_000));

        tasks.spawn(async move {
            tokio::time::sleep(arrival).await;
            match gate.acquire().await {
                Ok(permit) => {
                    let in_flight = gate.in_flight();
                    tokio::time::sleep(work).await;
                    drop(permit);
                    Some(in_flight)
                }
                Err(Rejected::Overloaded | Rejected::QueueTimeout) => None,
                Err(Rejected::Closed) => unreachable!("gate is never closed"),
            }
        });
    }

    let mut admitted = 0;
    let mut peak_in_flight = 0;
    while let Some(result) = tasks.join_next().await {
        if let Some(in_flight) = result.unwrap() {
            admitted += 1;
            peak_in_flight = peak_in_flight.max(in_flight);
        }
    }

    done.store(true, Ordering::SeqCst);
    let (monitored_in_flight, peak_waiting) = monitor.await.unwrap();
    Load { admitted, peak_in_flight: peak_in_flight.max(monitored_in_flight), peak_waiting }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn ceilings_hold_under_load(
        max_concurrent in 1usize..6,
        max_waiters in 0usize..8,
        queue_timeout_ms in proptest::option::of(1u64..10),
        requests in 20usize..120,
        seed in any::<u64>(),
    ) {
        let mut config = AdmissionConfig::unbounded()
            .with_max_concurrent(max_concurrent)
            .with_max_waiters(max_waiters);
        config.queue_timeout_ms = queue_timeout_ms;
        let (gate, stats) = gate(config);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();
        let load = runtime.block_on(hammer(gate.clone(), requests, seed));

        prop_assert!(load.peak_in_flight <= max_concurrent, "{} > {max_concurrent}", load.peak_in_flight);
        prop_assert!(load.peak_waiting <= max_waiters, "{} > {max_waiters}", load.peak_waiting);
        prop_assert!(load.admitted > 0);
        prop_assert_eq!(gate.in_flight(), 0);
        prop_assert_eq!(gate.waiting(), 0);
        prop_assert_eq!(stats.counter_value(ADMITTED) as usize, load.admitted);
        prop_assert_eq!(stats.counter_value(ADMITTED) + stats.counter_value(REJECTED), requests as u64);
    }
}
