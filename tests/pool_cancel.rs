/// Cancellation tests
///
/// Dropping an acquire future mid-flight must leave the pool exactly as it
/// was: no socket delivered, no counter residue, no idle entries.
use sockpool::balancer::RoundRobin;
use sockpool::{PoolConfig, SocketPool};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// TEST-NET-1 (RFC 5737): non-routable, so connects hang until cancelled.
fn blackhole_url(port: u16) -> Url {
    Url::parse(&format!("http://192.0.2.1:{}/", port)).unwrap()
}

#[tokio::test]
async fn cancelling_a_pending_connect_restores_counters() {
    let pool = Arc::new(
        SocketPool::new_specific(&[blackhole_url(9999)], PoolConfig::default(), |_| {
            Box::new(RoundRobin::new())
        })
        .unwrap(),
    );

    let task_pool = pool.clone();
    let task = tokio::spawn(async move {
        let url = blackhole_url(9999);
        // never completes against the blackhole address
        let _ = task_pool.acquire(&url).await;
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.total_count(), 1, "connect attempt holds a reservation");

    task.abort();
    let _ = task.await;

    assert_eq!(pool.total_count(), 0);
    assert_eq!(pool.stats().targets[0].request_count, 0);
    assert_eq!(pool.stats().idle, 0);
}

#[tokio::test]
async fn cancelling_a_balanced_connect_reverses_the_pick() {
    let pool = Arc::new(
        SocketPool::new_specific(
            &[blackhole_url(9998), blackhole_url(9997)],
            PoolConfig::default(),
            |_| Box::new(RoundRobin::new()),
        )
        .unwrap(),
    );

    let task_pool = pool.clone();
    let task = tokio::spawn(async move {
        let url = blackhole_url(9998);
        let _ = task_pool.acquire(&url).await;
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let in_flight: i64 = pool
        .stats()
        .targets
        .iter()
        .map(|t| t.request_count)
        .sum();
    assert_eq!(in_flight, 1, "the picked target carries the in-flight count");

    task.abort();
    let _ = task.await;

    let stats = pool.stats();
    assert_eq!(stats.total_count, 0);
    for target in &stats.targets {
        assert_eq!(target.request_count, 0);
    }
}

#[tokio::test]
async fn timing_out_an_acquire_behaves_like_cancellation() {
    let pool = SocketPool::new_specific(&[blackhole_url(9996)], PoolConfig::default(), |_| {
        Box::new(RoundRobin::new())
    })
    .unwrap();

    let url = blackhole_url(9996);
    let result = tokio::time::timeout(Duration::from_millis(200), pool.acquire(&url)).await;
    assert!(result.is_err(), "blackhole connect should not complete");

    assert_eq!(pool.total_count(), 0);
    assert_eq!(pool.stats().targets[0].request_count, 0);
}
