//! Multi-Core Pipeline Stress Test
//!
//! Several writers hammer their own slot ranges while readers drain the
//! channel and re-read every slot. Reports throughput, channel pressure and
//! any snapshot that came back older than its event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use shm_bus::publisher::Writer;
use shm_bus::workload::{OrderIds, OrderSource};
use shm_bus::{Bus, BusConfig, Consumer, DrainSummary, VersionTracker, WriterReport};

const RUN_FOR: Duration = Duration::from_secs(3);

fn run_test(writers: usize, readers: usize, channel_capacity: usize) {
    println!("\n═══════════════════════════════════════════════════════════════");
    println!(
        "Testing: {} writers, {} readers, channel {} slots",
        writers, readers, channel_capacity
    );
    println!("═══════════════════════════════════════════════════════════════");

    let bus = match Bus::shared(BusConfig {
        channel_capacity,
        orders_capacity: 1024,
        ..BusConfig::default()
    }) {
        Ok(bus) => bus,
        Err(e) => {
            eprintln!("Failed to create bus: {}", e);
            return;
        }
    };

    let start_barrier = Arc::new(Barrier::new(writers + readers + 1));
    let stop_flag = Arc::new(AtomicBool::new(false));
    let span = bus.store().orders().capacity() / writers;

    let writer_handles: Vec<_> = (0..writers)
        .map(|w| {
            let source = OrderSource::new(OrderIds::PerSlot(9000), w as u64);
            let range = w * span..(w + 1) * span;
            let writer = Writer::new(format!("writer-{w}"), Arc::clone(&bus), source, range, Duration::ZERO);
            let start_barrier = Arc::clone(&start_barrier);
            let stop_flag = Arc::clone(&stop_flag);
            thread::spawn(move || {
                start_barrier.wait();
                writer.and_then(|writer| writer.run(&stop_flag))
            })
        })
        .collect();

    let reader_handles: Vec<_> = (0..readers)
        .map(|_| {
            let consumer = Consumer::new(Arc::clone(&bus));
            let start_barrier = Arc::clone(&start_barrier);
            let stop_flag = Arc::clone(&stop_flag);
            thread::spawn(move || {
                let mut tracker = VersionTracker::new();
                let mut total = DrainSummary::default();
                start_barrier.wait();
                loop {
                    let stopping = stop_flag.load(Ordering::Acquire);
                    let summary = consumer.drain(&mut tracker);
                    total.events += summary.events;
                    total.observed += summary.observed;
                    if stopping {
                        break;
                    }
                    core::hint::spin_loop();
                }
                (total, tracker.stale.len())
            })
        })
        .collect();

    let test_start = Instant::now();
    start_barrier.wait();
    thread::sleep(RUN_FOR);
    stop_flag.store(true, Ordering::Release);

    let mut writes = WriterReport::default();
    for handle in writer_handles {
        match handle.join() {
            Ok(Ok(report)) => {
                writes.writes += report.writes;
                writes.dropped_oldest += report.dropped_oldest;
                writes.rejected += report.rejected;
            }
            Ok(Err(e)) => eprintln!("Writer failed: {}", e),
            Err(_) => eprintln!("Writer panicked"),
        }
    }

    let mut reads = 0u64;
    let mut stale = 0usize;
    for handle in reader_handles {
        if let Ok((summary, stale_reads)) = handle.join() {
            reads += summary.events;
            stale += stale_reads;
        }
    }
    let duration_secs = test_start.elapsed().as_secs_f64();
    let stats = bus.stats();

    println!("\n📊 AGGREGATE RESULTS:");
    println!("   Writes:         {}", writes.writes);
    println!("   Reads:          {}", reads);
    println!("   Published:      {}", stats.published);
    println!("   Dropped oldest: {}", stats.drops);
    println!("   Rejected:       {}", stats.rejected);
    println!("   Stale reads:    {}", stale);
    println!("   Test duration:  {:.2} seconds", duration_secs);
    println!("   ⚡ WRITE RATE:   {:.0} writes/s", writes.writes as f64 / duration_secs);
    println!("   ⚡ READ RATE:    {:.0} events/s", reads as f64 / duration_secs);
}

fn main() {
    println!("╔═══════════════════════════════════════════════════════════════╗");
    println!("║            ShmBus - Multi-Core Pipeline Stress Test           ║");
    println!(
        "║            Available CPUs: {:<4}                               ║",
        thread::available_parallelism().map(|p| p.get()).unwrap_or(1)
    );
    println!("╚═══════════════════════════════════════════════════════════════╝");

    let configs = [
        // (writers, readers, channel slots)
        (2, 1, 1024),
        (4, 2, 1024),
        (4, 2, 64), // overflow-heavy
    ];

    for (writers, readers, capacity) in configs {
        run_test(writers, readers, capacity);
    }

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Test Complete!                             ║");
    println!("╚═══════════════════════════════════════════════════════════════╝");
}
