use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use ulid::Ulid;

use cadence::clock::SystemClock;
use cadence::config::SchedulingConfig;
use cadence::directory::InMemoryDirectory;
use cadence::engine::{Collaborators, Engine, SchedulingError};
use cadence::ledger::InMemoryLedger;
use cadence::model::*;
use cadence::notify::{NotifyHub, Outbox};

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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

/// One studio with a room and a coach, open around the clock.
#[derive(Clone, Copy)]
struct Tenant {
    id: Ulid,
    studio: Ulid,
    room: Ulid,
    coach: Ulid,
}

fn seed(dir: &InMemoryDirectory) -> Tenant {
    let t = Tenant {
        id: Ulid::new(),
        studio: Ulid::new(),
        room: Ulid::new(),
        coach: Ulid::new(),
    };
    dir.put_studio(Studio {
        id: t.studio,
        tenant_id: t.id,
        name: "Bench".into(),
        opening_hours: OpeningHours::default(),
    });
    dir.put_room(Room {
        id: t.room,
        tenant_id: t.id,
        studio_id: t.studio,
        name: "Room".into(),
        is_active: true,
    });
    dir.put_coach(Coach {
        id: t.coach,
        tenant_id: t.id,
        name: "Coach".into(),
        is_active: true,
        availability_rules: Vec::new(),
        preferred_client_gender: None,
    });
    t
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2031, 1, 6, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn hour_slot(t: &Tenant, i: i64) -> CreateSession {
    let start = base() + chrono::Duration::hours(i);
    CreateSession::new(t.studio, t.room, t.coach, start, start + chrono::Duration::hours(1))
}

async fn phase1_sequential(engine: &Engine, tenant: Tenant) {
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        engine
            .create_session(tenant.id, hour_slot(&tenant, i as i64))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(engine: Arc<Engine>, tenants: &[Tenant]) {
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();
    for &tenant in tenants {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                engine
                    .create_session(tenant.id, hour_slot(&tenant, j))
                    .await
                    .unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = tenants.len() as i64 * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {} tenants x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        tenants.len(),
        elapsed.as_secs_f64()
    );
}

async fn phase3_slots_under_load(engine: Arc<Engine>, reader: Tenant, writers: &[Tenant]) {
    // every other hour of the first week booked
    for i in (0..24 * 7).step_by(2) {
        engine.create_session(reader.id, hour_slot(&reader, i)).await.unwrap();
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for &tenant in writers {
        let engine = engine.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let mut i = 10_000i64;
            while !stop.load(Ordering::Relaxed) {
                let _ = engine.create_session(tenant.id, hour_slot(&tenant, i)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 200;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let engine = engine.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for k in 0..reads_per_reader {
                let day = (base() + chrono::Duration::days(((r + k) % 7) as i64)).date_naive();
                let t = Instant::now();
                engine
                    .get_available_slots(reader.id, reader.studio, day, None)
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("slot query", &mut all_latencies);
}

async fn phase4_contention(engine: Arc<Engine>, tenant: Tenant) {
    let n_slots = 50;
    let contenders = 20;
    let won = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for slot in 0..n_slots {
        for _ in 0..contenders {
            let engine = engine.clone();
            let won = won.clone();
            let lost = lost.clone();
            handles.push(tokio::spawn(async move {
                match engine.create_session(tenant.id, hour_slot(&tenant, slot)).await {
                    Ok(_) => won.fetch_add(1, Ordering::Relaxed),
                    Err(SchedulingError::SchedulingConflict(_)) => {
                        lost.fetch_add(1, Ordering::Relaxed)
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                };
            }));
        }
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let won = won.load(Ordering::Relaxed);
    println!(
        "  {n_slots} slots x {contenders} contenders: {won} booked, {} rejected in {:.2}s",
        lost.load(Ordering::Relaxed),
        elapsed.as_secs_f64()
    );
    assert_eq!(won, n_slots as usize, "double booking under contention");
}

#[tokio::main]
async fn main() {
    let dir = std::env::temp_dir().join(format!("cadence_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();

    let directory = Arc::new(InMemoryDirectory::new());
    let tenants: Vec<Tenant> = (0..20).map(|_| seed(&directory)).collect();
    let collab = Collaborators::in_memory(
        directory,
        Arc::new(InMemoryLedger::new()),
        Arc::new(SystemClock),
    );
    let (outbox, _notices) = Outbox::new(16);
    let engine = Arc::new(
        Engine::new(
            dir.join("sessions.wal"),
            collab,
            Arc::new(NotifyHub::new()),
            outbox,
            SchedulingConfig::default(),
        )
        .unwrap(),
    );

    println!("=== cadence stress benchmark ===");
    println!("wal: {}\n", dir.display());

    println!("[phase 1] sequential write throughput");
    phase1_sequential(&engine, tenants[0]).await;

    println!("\n[phase 2] concurrent write throughput");
    phase2_concurrent(engine.clone(), &tenants[1..11]).await;

    println!("\n[phase 3] slot query latency under write load");
    phase3_slots_under_load(engine.clone(), tenants[11], &tenants[12..17]).await;

    println!("\n[phase 4] contended bookings");
    phase4_contention(engine.clone(), tenants[17]).await;

    println!("\n[compaction]");
    let t = Instant::now();
    engine.compact_wal().await.unwrap();
    println!("  compacted in {:.2}ms", t.elapsed().as_secs_f64() * 1000.0);

    let _ = std::fs::remove_dir_all(&dir);
    println!("\n=== done ===");
}
