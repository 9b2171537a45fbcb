//! Request queue benchmark suite.
//!
//! Measures single-flight queue throughput over the in-memory transport:
//! - Sequential sends: one request awaited at a time
//! - Burst sends: many requests submitted together, drained in order
//!
//! Run with: cargo bench --bench request_queue
//! Results saved to: target/criterion/

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tokio::runtime::Runtime;

use resilient_socket::{
    Client, ClientOptions, ConnectionState, MemoryConnector, MemoryLink, NoopHooks,
};

// ============================================================================
// Benchmark Parameters
// ============================================================================

const REQUEST_COUNTS: &[usize] = &[100, 1_000];
const PAYLOAD_SIZES: &[usize] = &[64, 4_096];

// ============================================================================
// Helpers
// ============================================================================

async fn open_client() -> (Client, MemoryLink) {
    let connector = MemoryConnector::auto_open();
    let options = ClientOptions::new("memory://bench").with_name("bench");
    let client = Client::new(options, connector.clone(), NoopHooks).expect("client creation");
    client
        .wait_for_state(ConnectionState::Open)
        .await
        .expect("client open");
    let link = connector.latest().expect("memory link");
    (client, link)
}

// ============================================================================
// Benchmark: Sequential Sends
// ============================================================================

fn bench_sequential(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let (client, link) = rt.block_on(open_client());

    let mut group = c.benchmark_group("sequential");

    for &size in PAYLOAD_SIZES {
        let payload = vec![0u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("send", size), &payload, |b, payload| {
            b.to_async(&rt).iter(|| async {
                client
                    .send("bench", payload.clone())
                    .await
                    .expect("send");
                link.take_sent();
            });
        });
    }

    group.finish();
    rt.block_on(client.dispose());
}

// ============================================================================
// Benchmark: Burst Sends
// ============================================================================

fn bench_burst(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let (client, link) = rt.block_on(open_client());

    let mut group = c.benchmark_group("burst");
    group.sample_size(20);

    for &count in REQUEST_COUNTS {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("drain", count), &count, |b, &count| {
            b.to_async(&rt).iter(|| async {
                let sends: Vec<_> = (0..count)
                    .map(|i| client.send("burst", format!("{i}")))
                    .collect();
                for result in futures_util::future::join_all(sends).await {
                    result.expect("send");
                }
                link.take_sent();
            });
        });
    }

    group.finish();
    rt.block_on(client.dispose());
}

criterion_group!(benches, bench_sequential, bench_burst);
criterion_main!(benches);
