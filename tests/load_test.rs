//! Load testing for the edge gateway.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

mod common;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_quota_is_exact() {
    // 1. Dependencies and a gateway with a small per-user limit
    let member = common::start_dependency().await;
    let product = common::start_dependency().await;
    let cart = common::start_dependency().await;
    let limit = 50;
    let mut config = common::test_config(&member, &product, &cart);
    config.rate_limit.default_limit = limit;
    let gateway = common::start_gateway(config).await;
    let token = common::codec().issue_access("m1", "m1@example.com", "USER").unwrap();

    common::wait_for_fresh_minute().await;

    // 2. Run Load Test
    let concurrency = 20;
    let requests_per_task = 10;
    let total_requests = concurrency * requests_per_task;

    let client = common::client();
    let rejected = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let mut tasks = Vec::new();
    for _ in 0..concurrency {
        let client = client.clone();
        let url = gateway.url("/api/v1/internal/products/1");
        let token = token.clone();
        let rejected = Arc::clone(&rejected);
        tasks.push(tokio::spawn(async move {
            let mut latencies = Vec::new();
            for _ in 0..requests_per_task {
                let req_start = Instant::now();
                let res = client.get(&url).bearer_auth(&token).send().await.unwrap();
                match res.status().as_u16() {
                    200 => latencies.push(req_start.elapsed()),
                    429 => {
                        rejected.fetch_add(1, Ordering::SeqCst);
                    }
                    other => panic!("unexpected status {other}"),
                }
            }
            latencies
        }));
    }

    let mut all_latencies: Vec<Duration> = Vec::new();
    for task in tasks {
        all_latencies.extend(task.await.unwrap());
    }

    let duration = start.elapsed();
    let rps = total_requests as f64 / duration.as_secs_f64();

    // 3. Exactly `limit` requests got through, none double-counted or lost
    assert_eq!(all_latencies.len(), limit as usize);
    assert_eq!(rejected.load(Ordering::SeqCst), total_requests - limit as usize);
    assert_eq!(product.hits(), limit as usize);

    all_latencies.sort();
    let p50 = all_latencies[all_latencies.len() / 2];
    let p95 = all_latencies[(all_latencies.len() as f64 * 0.95) as usize];

    println!("\n--- Load Test Results ---");
    println!("Total Requests: {}", total_requests);
    println!("Concurrency:    {}", concurrency);
    println!("Total Duration: {:?}", duration);
    println!("Requests/sec:   {:.2}", rps);
    println!("P50 Latency:    {:?}", p50);
    println!("P95 Latency:    {:?}", p95);
    println!("Admitted:       {}/{}", all_latencies.len(), total_requests);
    println!("-------------------------\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_public_path_under_load() {
    let member = common::start_dependency().await;
    let product = common::start_dependency().await;
    let cart = common::start_dependency().await;
    let mut config = common::test_config(&member, &product, &cart);
    config.rate_limit.enabled = false;
    let gateway = common::start_gateway(config).await;

    let concurrency = 20;
    let requests_per_task = 25;
    let client = common::client();

    let mut tasks = Vec::new();
    for _ in 0..concurrency {
        let client = client.clone();
        let url = gateway.url("/api/v1/products/1");
        tasks.push(tokio::spawn(async move {
            let mut ok = 0usize;
            for _ in 0..requests_per_task {
                if client.get(&url).send().await.unwrap().status().is_success() {
                    ok += 1;
                }
            }
            ok
        }));
    }

    let mut succeeded = 0;
    for task in tasks {
        succeeded += task.await.unwrap();
    }
    assert_eq!(succeeded, concurrency * requests_per_task);
    assert_eq!(product.hits(), concurrency * requests_per_task);
}
