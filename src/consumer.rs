//! Consumer protocol
//!
//! Drain the channel until it reports empty, re-reading `table[index]` for
//! every event. The event's version is a hint: the snapshot may be newer,
//! never older. Upserts that resolve to an empty slot are skipped, and
//! events naming a slot outside their table are counted and dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::bus::Bus;
use crate::event::{Event, Operation, TableId};
use crate::record::{AnyRecord, Snapshot};

/// Events handled between voluntary yields
const YIELD_EVERY: u64 = 10;

/// Receives resolved events
pub trait EventSink {
    /// An Upsert whose slot holds a record
    fn on_snapshot(&mut self, event: &Event, snapshot: &Snapshot<AnyRecord>);

    /// A Delete event; `snapshot` is whatever the slot holds now
    fn on_delete(&mut self, _event: &Event, _snapshot: &Snapshot<AnyRecord>) {}
}

/// Totals for one drain pass (or a whole reader run)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Events taken off the channel
    pub events: u64,
    /// Upserts delivered to [`EventSink::on_snapshot`]
    pub observed: u64,
    /// Upserts whose slot read empty
    pub skipped_empty: u64,
    /// Delete events delivered to [`EventSink::on_delete`]
    pub deletions: u64,
    /// Events whose slot could not be read
    pub skipped_invalid: u64,
}

impl DrainSummary {
    fn merge(&mut self, other: DrainSummary) {
        self.events += other.events;
        self.observed += other.observed;
        self.skipped_empty += other.skipped_empty;
        self.deletions += other.deletions;
        self.skipped_invalid += other.skipped_invalid;
    }
}

/// Drains events and resolves them against the store
#[derive(Clone)]
pub struct Consumer {
    bus: Arc<Bus>,
}

impl Consumer {
    pub fn new(bus: Arc<Bus>) -> Self {
        Self { bus }
    }

    /// Resolve a single event
    ///
    /// An event naming a slot outside its table reaches nobody; it is
    /// counted in `skipped_invalid` and the drain carries on.
    pub fn resolve<S: EventSink>(&self, event: &Event, sink: &mut S, summary: &mut DrainSummary) {
        summary.events += 1;
        let snapshot = match self.bus.store().read(event.table, usize::from(event.index)) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                summary.skipped_invalid += 1;
                tracing::warn!(%event, error = %e, "skipping unresolvable event");
                return;
            }
        };

        match event.op {
            Operation::Delete => {
                summary.deletions += 1;
                sink.on_delete(event, &snapshot);
            }
            Operation::Upsert if snapshot.is_empty() => summary.skipped_empty += 1,
            Operation::Upsert => {
                summary.observed += 1;
                sink.on_snapshot(event, &snapshot);
            }
        }
    }

    /// Take events until the channel reports empty
    pub fn drain<S: EventSink>(&self, sink: &mut S) -> DrainSummary {
        let mut summary = DrainSummary::default();
        while let Some(event) = self.bus.channel().try_consume() {
            self.resolve(&event, sink, &mut summary);
            if summary.events % YIELD_EVERY == 0 {
                thread::yield_now();
            }
        }
        summary
    }
}

/// A consumer that polls until shut down
pub struct Reader<S: EventSink> {
    name: String,
    consumer: Consumer,
    sink: S,
    idle: Duration,
}

impl<S: EventSink> Reader<S> {
    pub fn new(name: impl Into<String>, bus: Arc<Bus>, sink: S, idle: Duration) -> Self {
        Self {
            name: name.into(),
            consumer: Consumer::new(bus),
            sink,
            idle,
        }
    }

    /// Drain, sleep `idle`, repeat until `shutdown` is set
    ///
    /// Returns the accumulated summary and the sink.
    pub fn run(mut self, shutdown: &AtomicBool) -> (DrainSummary, S) {
        tracing::info!(module = %self.name, "starting event reader");

        let mut total = DrainSummary::default();
        while !shutdown.load(Ordering::Acquire) {
            total.merge(self.consumer.drain(&mut self.sink));
            thread::sleep(self.idle);
        }

        tracing::info!(
            module = %self.name,
            events = total.events,
            skipped_invalid = total.skipped_invalid,
            "event reader shutting down"
        );
        (total, self.sink)
    }
}

/// Logs every resolved event at trace level
pub struct TracingSink {
    module: String,
}

impl TracingSink {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
        }
    }
}

impl EventSink for TracingSink {
    fn on_snapshot(&mut self, event: &Event, snapshot: &Snapshot<AnyRecord>) {
        tracing::trace!(
            module = %self.module,
            %event,
            observed_version = snapshot.version,
            record = %snapshot.record,
            "READ"
        );
    }

    fn on_delete(&mut self, event: &Event, snapshot: &Snapshot<AnyRecord>) {
        tracing::trace!(
            module = %self.module,
            %event,
            observed_version = snapshot.version,
            "DELETE"
        );
    }
}

/// Highest version seen per slot, plus any observation older than its event
#[derive(Debug, Default)]
pub struct VersionTracker {
    latest: HashMap<(TableId, u16), u32>,
    /// `(event, observed_version)` where the read came back older than the event
    pub stale: Vec<(Event, u32)>,
}

impl VersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self, table: TableId, index: u16) -> Option<u32> {
        self.latest.get(&(table, index)).copied()
    }

    pub fn slots(&self) -> usize {
        self.latest.len()
    }

    fn observe(&mut self, event: &Event, version: u32) {
        if version < event.version {
            self.stale.push((*event, version));
        }
        let latest = self.latest.entry((event.table, event.index)).or_insert(0);
        *latest = (*latest).max(version);
    }
}

impl EventSink for VersionTracker {
    fn on_snapshot(&mut self, event: &Event, snapshot: &Snapshot<AnyRecord>) {
        self.observe(event, snapshot.version);
    }

    fn on_delete(&mut self, event: &Event, snapshot: &Snapshot<AnyRecord>) {
        self.observe(event, snapshot.version);
    }
}
