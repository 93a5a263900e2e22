/// Benchmark: acquire/checkin hot path
///
/// Measures the reuse cycle against a warm pool (pop + probe + import +
/// export + push) and the miss path that has to open a fresh connection.
use criterion::{criterion_group, criterion_main, Criterion};
use sockpool::balancer::RoundRobin;
use sockpool::{PoolConfig, SocketPool};
use tokio::net::TcpListener;
use url::Url;

fn setup(rt: &tokio::runtime::Runtime) -> (SocketPool, Url) {
    rt.block_on(async {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                if let Ok((stream, _)) = listener.accept().await {
                    held.push(stream);
                }
            }
        });
        let url = Url::parse(&format!("http://{}/", addr)).unwrap();
        let pool = SocketPool::new_specific(&[url.clone()], PoolConfig::default(), |_| {
            Box::new(RoundRobin::new())
        })
        .unwrap();
        (pool, url)
    })
}

fn bench_reuse_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let (pool, url) = setup(&rt);

    // warm the pool so every iteration hits the idle list
    rt.block_on(async {
        let stream = pool.acquire(&url).await.unwrap();
        pool.checkin(stream).unwrap();
    });

    c.bench_function("acquire_checkin_reuse", |b| {
        b.iter(|| {
            rt.block_on(async {
                let stream = pool.acquire(&url).await.unwrap();
                pool.checkin(stream).unwrap();
            })
        })
    });
}

fn bench_fresh_connect(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let (pool, url) = setup(&rt);

    c.bench_function("acquire_fresh_connect", |b| {
        b.iter(|| {
            rt.block_on(async {
                // dropping instead of returning forces a connect next time
                let stream = pool.acquire(&url).await.unwrap();
                drop(stream);
            })
        })
    });
}

criterion_group!(benches, bench_reuse_cycle, bench_fresh_connect);
criterion_main!(benches);
