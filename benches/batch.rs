use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use futures::future::join_all;
use ulid::Ulid;

use incasa::model::{Guest, Listing, ReservationRequest};
use incasa::{AvailabilityEngine, EngineConfig, InMemoryStore};

const LISTINGS: usize = 1_000;
const RESERVATIONS_PER_LISTING: u64 = 20;
const ROUNDS: usize = 200;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn guest(n: u64) -> Guest {
    Guest {
        full_name: format!("Guest {n}"),
        email: format!("guest{n}@example.com"),
        phone: "000".into(),
        document_number: n.to_string(),
        document_url: None,
    }
}

async fn setup(engine: &AvailabilityEngine) -> Vec<Ulid> {
    let base = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    let mut ids = Vec::with_capacity(LISTINGS);
    for i in 0..LISTINGS {
        let id = Ulid::new();
        let mut listing = Listing::new(id, Some(format!("Kitnet {i}")), 100_00);
        listing.enabled = i % 10 != 0;
        engine.register_listing(listing).await.unwrap();
        ids.push(id);
    }

    // Three-day stays with a one-day gap, staggered per listing.
    for (i, id) in ids.iter().enumerate().filter(|(i, _)| i % 10 != 0) {
        for n in 0..RESERVATIONS_PER_LISTING {
            let start = base + Days::new(n * 4 + (i as u64 % 4));
            let request = ReservationRequest {
                listing_id: *id,
                start_date: start,
                end_date: start + Days::new(2),
                guest: guest(n),
            };
            engine.reserve(request).await.unwrap();
        }
    }
    println!(
        "  created {LISTINGS} listings, {} reservations",
        (LISTINGS - LISTINGS / 10) as u64 * RESERVATIONS_PER_LISTING
    );
    ids
}

async fn run(label: &str, config: &EngineConfig) {
    println!("\n{label}");
    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(AvailabilityEngine::with_store(store, config));
    let ids = setup(&engine).await;
    let base = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();

    let mut batch = Vec::with_capacity(ROUNDS);
    for round in 0..ROUNDS {
        let start = base + Days::new((round % 60) as u64);
        let t = Instant::now();
        let map = engine
            .batch_availability(&ids, Some(start), Some(start + Days::new(1)))
            .await
            .unwrap();
        batch.push(t.elapsed());
        assert_eq!(map.len(), ids.len());
    }
    print_latency(&format!("batch_availability ({} listings)", ids.len()), &mut batch);

    let mut single = Vec::with_capacity(ROUNDS);
    for round in 0..ROUNDS {
        let id = ids[round % ids.len()];
        let start = base + Days::new((round % 60) as u64);
        let t = Instant::now();
        engine.is_available(id, start, start + Days::new(1)).await.unwrap();
        single.push(t.elapsed());
    }
    print_latency("is_available", &mut single);

    // Many callers at once, one batch each.
    let t = Instant::now();
    let concurrent = (0..32).map(|n| {
        let engine = engine.clone();
        let ids = ids.clone();
        async move {
            let start = base + Days::new(n);
            engine
                .batch_availability(&ids, Some(start), Some(start + Days::new(6)))
                .await
                .unwrap()
        }
    });
    let maps = join_all(concurrent).await;
    println!(
        "  32 concurrent batches: {:.2}ms total",
        t.elapsed().as_secs_f64() * 1000.0
    );
    assert!(maps.iter().all(|m| m.len() == ids.len()));

    let t = Instant::now();
    let catalog = engine.catalog(Some(base), Some(base + Days::new(6))).await.unwrap();
    println!(
        "  catalog ({} listings): {:.2}ms",
        catalog.len(),
        t.elapsed().as_secs_f64() * 1000.0
    );
}

#[tokio::main]
async fn main() {
    println!("incasa availability benchmark");
    run(
        "uncached",
        &EngineConfig {
            cache_ttl: None,
            ..EngineConfig::default()
        },
    )
    .await;
    run(
        "cached (60s ttl)",
        &EngineConfig {
            cache_ttl: Some(Duration::from_secs(60)),
            ..EngineConfig::default()
        },
    )
    .await;
}
