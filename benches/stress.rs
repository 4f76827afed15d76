use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use vacancy::engine::{Engine, EngineError};
use vacancy::model::*;

const DAY: Ms = 86_400_000;
const JAN_1_2025: Ms = 1_735_689_600_000;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
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
        latencies.last().map_or(0.0, |d| d.as_secs_f64() * 1000.0),
    );
}

fn fresh_engine(label: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("vacancy_bench_{label}_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    Arc::new(Engine::new(dir.join("ledger.wal")).expect("open engine"))
}

fn nights(first_night: i64, count: i64) -> Span {
    Span::new(JAN_1_2025 + first_night * DAY, JAN_1_2025 + (first_night + count) * DAY)
}

async fn register(engine: &Engine, id: &str, capacity: u32) -> ResourceKey {
    let key = ResourceKey::new(id, ResourceType::Room);
    engine
        .register_resource(key.clone(), None, capacity, Category::General)
        .await
        .expect("register resource");
    key
}

/// Create a booking and try to allocate one unit of `key` to it.
async fn book_and_allocate(engine: &Engine, key: &ResourceKey, span: Span) -> Result<Booking, EngineError> {
    let booking = engine
        .create_booking(NewBooking {
            user_id: "bench".into(),
            resource: ResourceRef::Property {
                property_id: "P1".into(),
                room_type: "double".into(),
            },
            span,
            payment: PaymentSummary::default(),
        })
        .await?;
    engine
        .allocate_resource(AllocationRequest {
            booking_id: booking.id,
            resource: key.clone(),
            resource_name: key.resource_id.clone(),
            capacity: 1,
            quantity: 1,
            assigned_by: None,
            notes: None,
        })
        .await
}

async fn phase1_sequential() {
    let engine = fresh_engine("sequential");
    let key = register(&engine, "R-seq", 10).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let t = Instant::now();
        book_and_allocate(&engine, &key, nights((i % 300) as i64, 1))
            .await
            .expect("sequential allocation");
        latencies.push(t.elapsed());
    }
    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} allocations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("book + allocate latency", &mut latencies);
}

async fn phase2_contended() {
    let engine = fresh_engine("contended");
    let capacities = [1u32, 1, 5, 10];
    let mut keys = Vec::new();
    for (i, cap) in capacities.iter().enumerate() {
        keys.push((register(&engine, &format!("R-hot-{i}"), *cap).await, *cap));
    }

    let n_tasks = 32;
    let n_per_task = 50;
    let start = Instant::now();
    let mut handles = Vec::new();
    for t in 0..n_tasks {
        let engine = engine.clone();
        let keys = keys.clone();
        handles.push(tokio::spawn(async move {
            let mut won = vec![0u32; keys.len()];
            for j in 0..n_per_task {
                let slot = (t + j) % keys.len();
                // Everyone fights over the same ten nights.
                match book_and_allocate(&engine, &keys[slot].0, nights((j % 10) as i64, 1)).await {
                    Ok(_) => won[slot] += 1,
                    Err(EngineError::CapacityExceeded { .. }) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
            won
        }));
    }

    let mut won = vec![0u32; keys.len()];
    for h in handles {
        for (slot, n) in h.await.expect("task panicked").into_iter().enumerate() {
            won[slot] += n;
        }
    }
    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    println!(
        "  {n_tasks} tasks x {n_per_task} attempts = {total} in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    for ((key, cap), n) in keys.iter().zip(&won) {
        let limit = cap * 10;
        let verdict = if *n <= limit { "ok" } else { "OVERBOOKED" };
        println!("    {key}: {n} allocations won, limit {limit} [{verdict}]");
    }
}

async fn phase3_read_under_load() {
    let engine = fresh_engine("reads");
    let key = register(&engine, "R-read", 50).await;
    for i in 0..500 {
        book_and_allocate(&engine, &key, nights(i % 200, 3))
            .await
            .expect("seed allocation");
    }

    let writer = {
        let engine = engine.clone();
        let key = key.clone();
        tokio::spawn(async move {
            for i in 0..1000 {
                let _ = book_and_allocate(&engine, &key, nights(200 + i % 100, 2)).await;
            }
        })
    };

    let mut latencies = Vec::with_capacity(2000);
    for i in 0..2000 {
        let t = Instant::now();
        engine
            .check_resource_availability(&key, nights(i % 250, 7), None)
            .await
            .expect("availability query");
        latencies.push(t.elapsed());
    }
    writer.await.expect("writer panicked");
    print_latency("availability latency", &mut latencies);
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    println!("=== vacancy stress benchmark ===\n");

    println!("[phase 1] sequential allocation throughput");
    phase1_sequential().await;

    println!("\n[phase 2] contended allocation");
    phase2_contended().await;

    println!("\n[phase 3] availability latency under write load");
    phase3_read_under_load().await;

    println!("\n=== benchmark complete ===");
}
