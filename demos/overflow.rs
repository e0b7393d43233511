//! Drop-oldest walkthrough
//!
//! Publishes more events than the channel holds and shows which ones
//! survive.

use shm_bus::{Bus, BusConfig, Consumer, EventSink, Order, Publisher, Snapshot, AnyRecord, Event};
use std::sync::Arc;

struct Printer;

impl EventSink for Printer {
    fn on_snapshot(&mut self, event: &Event, snapshot: &Snapshot<AnyRecord>) {
        println!("  {event}  ->  v{} {}", snapshot.version, snapshot.record);
    }
}

fn main() {
    let bus = match Bus::shared(BusConfig {
        channel_capacity: 4,
        ..BusConfig::default()
    }) {
        Ok(bus) => bus,
        Err(e) => {
            eprintln!("Failed to create bus: {}", e);
            std::process::exit(1);
        }
    };

    println!("Channel: {} slots, {} usable", bus.channel().capacity(), bus.channel().usable());
    println!();

    let publisher = Publisher::new(Arc::clone(&bus));
    for qty in 1..=6 {
        let order = Order {
            id: 9000 + qty as u64,
            qty,
            price: 100.0 + qty as f32,
        };
        match publisher.upsert(qty as usize, order) {
            Ok(receipt) => println!("publish {}  {:?}", receipt.event, receipt.delivery),
            Err(e) => eprintln!("publish failed: {}", e),
        }
    }

    let stats = bus.stats();
    println!();
    println!("published={} drops={} unread={}", stats.published, stats.drops, bus.channel().len());
    println!();
    println!("Draining:");

    let summary = Consumer::new(bus).drain(&mut Printer);
    println!("\n{} events resolved", summary.events);
}
