//! Multi-producer / multi-consumer channel tests
//!
//! Usage:
//!   cargo test --release --test channel_concurrency_test

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use shm_bus::{BusError, Event, EventChannel, PublishOutcome, TableId};

const PRODUCERS: u16 = 4;
const PER_PRODUCER: u32 = 20_000;

/// Producer id rides in the index, sequence number in the version
fn event(producer: u16, seq: u32) -> Event {
    Event::upsert(TableId::Orders, producer, seq)
}

#[test]
fn test_accounting_under_contention() {
    // Small ring so drops and rejections actually happen
    let channel = Arc::new(EventChannel::new(64).unwrap());
    let start = Arc::new(Barrier::new(PRODUCERS as usize + 2 + 1));
    let producers_done = Arc::new(AtomicBool::new(false));
    let calls = Arc::new(AtomicU64::new(0));
    let full = Arc::new(AtomicU64::new(0));

    let mut producers = Vec::new();
    for producer in 0..PRODUCERS {
        let channel = Arc::clone(&channel);
        let start = Arc::clone(&start);
        let calls = Arc::clone(&calls);
        let full = Arc::clone(&full);
        producers.push(thread::spawn(move || {
            start.wait();
            for seq in 1..=PER_PRODUCER {
                calls.fetch_add(1, Ordering::Relaxed);
                match channel.publish(event(producer, seq)) {
                    Ok(_) => {}
                    Err(BusError::ChannelFull) => {
                        full.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => panic!("unexpected error: {err}"),
                }
            }
        }));
    }

    let mut consumers = Vec::new();
    for _ in 0..2 {
        let channel = Arc::clone(&channel);
        let start = Arc::clone(&start);
        let producers_done = Arc::clone(&producers_done);
        consumers.push(thread::spawn(move || {
            start.wait();
            let mut taken = 0u64;
            loop {
                match channel.try_consume() {
                    Some(_) => taken += 1,
                    None if producers_done.load(Ordering::Acquire) => break,
                    None => thread::yield_now(),
                }
            }
            taken
        }));
    }

    start.wait();
    for handle in producers {
        handle.join().unwrap();
    }
    producers_done.store(true, Ordering::Release);
    let mut taken: u64 = consumers.into_iter().map(|h| h.join().unwrap()).sum();

    // Quiescent: finish the drain on this thread
    while channel.try_consume().is_some() {
        taken += 1;
    }

    let stats = channel.stats();
    let total = calls.load(Ordering::Relaxed);
    assert_eq!(total, u64::from(PRODUCERS) * u64::from(PER_PRODUCER));
    assert_eq!(stats.published + stats.rejected, total);
    assert_eq!(stats.rejected, full.load(Ordering::Relaxed));
    assert_eq!(stats.consumed, taken);
    assert_eq!(stats.published, stats.consumed + stats.drops);
    assert!(channel.is_empty());
}

#[test]
fn test_every_drop_reported_to_its_publisher() {
    const EVICTING_PRODUCERS: u16 = 8;

    // Two slots, one usable: almost every publish evicts
    let channel = Arc::new(EventChannel::new(2).unwrap());
    let start = Arc::new(Barrier::new(EVICTING_PRODUCERS as usize));
    let dropped_oldest = Arc::new(AtomicU64::new(0));
    let full = Arc::new(AtomicU64::new(0));

    let producers: Vec<_> = (0..EVICTING_PRODUCERS)
        .map(|producer| {
            let channel = Arc::clone(&channel);
            let start = Arc::clone(&start);
            let dropped_oldest = Arc::clone(&dropped_oldest);
            let full = Arc::clone(&full);
            thread::spawn(move || {
                start.wait();
                for seq in 1..=PER_PRODUCER {
                    match channel.publish(event(producer, seq)) {
                        Ok(PublishOutcome::DroppedOldest) => {
                            dropped_oldest.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(PublishOutcome::Published) => {}
                        Err(BusError::ChannelFull) => {
                            full.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => panic!("unexpected error: {err}"),
                    }
                }
            })
        })
        .collect();
    for handle in producers {
        handle.join().unwrap();
    }

    let stats = channel.stats();
    assert_eq!(stats.drops, dropped_oldest.load(Ordering::Relaxed));
    assert_eq!(stats.rejected, full.load(Ordering::Relaxed));
    assert_eq!(
        stats.published + stats.rejected,
        u64::from(EVICTING_PRODUCERS) * u64::from(PER_PRODUCER)
    );
    assert!(stats.drops > 0);

    // No consumer ran: everything published but the survivor was evicted
    assert_eq!(channel.len(), 1);
    assert_eq!(stats.published, stats.drops + 1);
}

#[test]
fn test_per_producer_fifo_without_drops() {
    // Large enough that nothing is ever evicted
    let channel = Arc::new(EventChannel::new(1 << 17).unwrap());
    let start = Arc::new(Barrier::new(PRODUCERS as usize + 1));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let channel = Arc::clone(&channel);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for seq in 1..=PER_PRODUCER {
                    let outcome = channel.publish(event(producer, seq));
                    assert!(matches!(outcome, Ok(PublishOutcome::Published)));
                }
            })
        })
        .collect();

    // Single consumer racing the producers
    start.wait();
    let mut last = vec![0u32; PRODUCERS as usize];
    let mut received = 0u64;
    let expected = u64::from(PRODUCERS) * u64::from(PER_PRODUCER);
    while received < expected {
        match channel.try_consume() {
            Some(event) => {
                let producer = usize::from(event.index);
                assert_eq!(event.version, last[producer] + 1, "producer {producer} out of order");
                last[producer] = event.version;
                received += 1;
            }
            None => thread::yield_now(),
        }
    }

    for handle in producers {
        handle.join().unwrap();
    }
    assert!(last.iter().all(|&v| v == PER_PRODUCER));
    assert_eq!(channel.stats().drops, 0);
}

#[test]
fn test_order_kept_across_drops() {
    let channel = Arc::new(EventChannel::new(16).unwrap());
    let done = Arc::new(AtomicBool::new(false));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                for seq in 1..=PER_PRODUCER {
                    let _ = channel.publish(event(producer, seq));
                }
            })
        })
        .collect();

    let consumer = {
        let channel = Arc::clone(&channel);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut last = vec![0u32; PRODUCERS as usize];
            let mut seen = HashSet::new();
            loop {
                match channel.try_consume() {
                    Some(event) => {
                        let producer = usize::from(event.index);
                        // Gaps allowed (evicted), reordering and duplicates are not
                        assert!(event.version > last[producer]);
                        assert!(seen.insert((event.index, event.version)));
                        last[producer] = event.version;
                    }
                    None if done.load(Ordering::Acquire) => break,
                    None => thread::yield_now(),
                }
            }
            seen.len() as u64
        })
    };

    for handle in producers {
        handle.join().unwrap();
    }
    done.store(true, Ordering::Release);
    let delivered = consumer.join().unwrap();

    let stats = channel.stats();
    assert_eq!(stats.consumed, delivered);
    assert_eq!(stats.published, stats.consumed + stats.drops + channel.len() as u64);
}

#[test]
fn test_occupancy_bounded_during_overflow() {
    let channel = Arc::new(EventChannel::new(8).unwrap());
    let stop = Arc::new(AtomicBool::new(false));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let channel = Arc::clone(&channel);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut seq = 0;
                while !stop.load(Ordering::Relaxed) {
                    seq += 1;
                    let _ = channel.publish(event(producer, seq));
                }
            })
        })
        .collect();

    for _ in 0..10_000 {
        assert!(channel.len() <= channel.usable());
    }
    while channel.stats().drops == 0 {
        thread::yield_now();
    }
    stop.store(true, Ordering::Relaxed);
    for handle in producers {
        handle.join().unwrap();
    }

    let len = channel.len();
    assert!(len > 0 && len <= channel.usable());
    assert!(channel.stats().drops > 0);
}
