/// Counter accounting tests
///
/// Every increment of the pool-wide reserved-slot counter and of the
/// per-target in-flight counter must be matched on every completion path:
/// delivery, return, close, and failure.
use sockpool::balancer::RoundRobin;
use sockpool::{AcquireError, PoolConfig, SocketPool};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use url::Url;

fn url_for(addr: SocketAddr) -> Url {
    Url::parse(&format!("http://{}/", addr)).unwrap()
}

async fn holding_listener() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            if let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        }
    });
    (addr, handle)
}

fn single_target_pool(addr: SocketAddr, config: PoolConfig) -> SocketPool {
    SocketPool::new_specific(&[url_for(addr)], config, |_| Box::new(RoundRobin::new())).unwrap()
}

#[tokio::test]
async fn dropping_a_checked_out_stream_releases_its_slot() {
    let (addr, _server) = holding_listener().await;
    let pool = single_target_pool(addr, PoolConfig::default());

    let stream = pool.acquire(&url_for(addr)).await.unwrap();
    assert_eq!(pool.total_count(), 1);

    drop(stream);
    assert_eq!(pool.total_count(), 0);
    assert_eq!(pool.stats().idle, 0);
}

#[tokio::test]
async fn checkin_keeps_the_slot_reserved() {
    let (addr, _server) = holding_listener().await;
    let pool = single_target_pool(addr, PoolConfig::default());

    let stream = pool.acquire(&url_for(addr)).await.unwrap();
    pool.checkin(stream).unwrap();

    let stats = pool.stats();
    assert_eq!(stats.total_count, 1);
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.targets.len(), 1);
    assert_eq!(stats.targets[0].idle, 1);
}

/// Pins the historical accounting quirk: pools that never engage the
/// balancer (single-target and global pools) do not increment the target's
/// in-flight counter on a fresh connect, yet checkin and close both
/// decrement it, so the counter drifts negative across reuse cycles.
#[tokio::test]
async fn request_count_drift_on_single_target_pools_is_preserved() {
    let (addr, _server) = holding_listener().await;
    let pool = single_target_pool(addr, PoolConfig::default());

    let stream = pool.acquire(&url_for(addr)).await.unwrap();
    assert_eq!(pool.stats().targets[0].request_count, 0);

    pool.checkin(stream).unwrap();
    assert_eq!(pool.stats().targets[0].request_count, -1);

    let stream = pool.acquire(&url_for(addr)).await.unwrap();
    assert_eq!(pool.stats().targets[0].request_count, -1);

    drop(stream);
    assert_eq!(pool.stats().targets[0].request_count, -2);
}

#[tokio::test]
async fn capacity_is_stored_but_not_enforced() {
    let (addr, _server) = holding_listener().await;
    let pool = single_target_pool(
        addr,
        PoolConfig {
            capacity: 1,
            ..Default::default()
        },
    );

    let first = pool.acquire(&url_for(addr)).await.unwrap();
    let second = pool.acquire(&url_for(addr)).await.unwrap();

    assert_eq!(pool.capacity(), 1);
    assert_eq!(pool.total_count(), 2, "capacity is advisory only");

    drop(first);
    drop(second);
    assert_eq!(pool.total_count(), 0);
}

#[tokio::test]
async fn dns_failure_is_terminal_and_leaves_no_residue() {
    let url = Url::parse("http://definitely-not-a-real-host.invalid:80/").unwrap();
    let pool = SocketPool::new_specific(&[url.clone()], PoolConfig::default(), |_| {
        Box::new(RoundRobin::new())
    })
    .unwrap();

    let err = pool.acquire(&url).await.unwrap_err();
    assert!(matches!(err, AcquireError::Dns(_)), "got {:?}", err);

    let stats = pool.stats();
    assert_eq!(stats.total_count, 0);
    assert_eq!(stats.targets[0].request_count, 0);
}

#[tokio::test]
async fn failed_connect_releases_the_reservation() {
    // bind then drop so the port refuses connections
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let pool = single_target_pool(addr, PoolConfig::default());
    let err = pool.acquire(&url_for(addr)).await.unwrap_err();
    assert!(matches!(err, AcquireError::ConnectionFailed));
    assert_eq!(err.to_string(), "connection failed");

    assert_eq!(pool.total_count(), 0);
    assert_eq!(pool.stats().targets[0].request_count, 0);
}
