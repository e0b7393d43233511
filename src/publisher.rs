//! Publisher protocol
//!
//! One cycle: write the record fields, bump the version, fence, then
//! publish an [`Event`] naming the new version. Channel pressure never
//! blocks a writer; a drop-oldest or a rejected publish is only counted.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::bus::Bus;
use crate::channel::PublishOutcome;
use crate::config::MAX_TABLE_CAPACITY;
use crate::error::{BusError, Result};
use crate::event::{Event, TableId};
use crate::record::{AnyRecord, Record};
use crate::workload::RecordSource;

/// Writes between progress log lines
const PROGRESS_EVERY: u64 = 50;

/// What happened to the event after the record write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Published,
    /// Published; an older unread event was evicted to make room
    DroppedOldest,
    /// Not published, the channel stayed full. The record write still stands.
    Rejected,
}

/// Result of one publisher cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    pub event: Event,
    pub delivery: Delivery,
}

/// Mutates records and announces each mutation
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<Bus>,
}

impl Publisher {
    pub fn new(bus: Arc<Bus>) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    /// Write `record` at `index` of its table and publish an Upsert event
    ///
    /// Fails only if `index` is outside the table; channel pressure is
    /// reported through [`PublishReceipt::delivery`].
    pub fn upsert(&self, index: usize, record: impl Into<AnyRecord>) -> Result<PublishReceipt> {
        let record = record.into();
        let table = record.table();
        let slot = event_index(table, index)?;
        let version = self.bus.store().write(index, record)?;
        Ok(self.announce(Event::upsert(table, slot, version)))
    }

    /// Empty `table[index]` and publish a Delete event
    pub fn delete(&self, table: TableId, index: usize) -> Result<PublishReceipt> {
        let slot = event_index(table, index)?;
        let version = self.bus.store().delete(table, index)?;
        Ok(self.announce(Event::delete(table, slot, version)))
    }

    fn announce(&self, event: Event) -> PublishReceipt {
        let delivery = match self.bus.channel().publish(event) {
            Ok(PublishOutcome::Published) => Delivery::Published,
            Ok(PublishOutcome::DroppedOldest) => {
                tracing::debug!(%event, "channel full, dropped oldest event");
                Delivery::DroppedOldest
            }
            Err(err) => {
                tracing::warn!(%err, %event, "event not published");
                Delivery::Rejected
            }
        };
        PublishReceipt { event, delivery }
    }
}

/// Narrow a slot index to the event's 16-bit field
#[inline]
fn event_index(table: TableId, index: usize) -> Result<u16> {
    u16::try_from(index).map_err(|_| BusError::IndexOutOfBounds {
        table,
        index,
        capacity: MAX_TABLE_CAPACITY,
    })
}

/// Round-robin over a slot range
#[derive(Debug, Clone)]
pub struct IndexCursor {
    range: Range<usize>,
    next: usize,
}

impl IndexCursor {
    pub fn new(range: Range<usize>) -> Result<Self> {
        if range.is_empty() {
            return Err(BusError::InvalidArgument {
                what: "empty index range",
            });
        }
        Ok(Self {
            next: range.start,
            range,
        })
    }

    pub fn range(&self) -> &Range<usize> {
        &self.range
    }
}

impl Iterator for IndexCursor {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let index = self.next;
        self.next += 1;
        if self.next == self.range.end {
            self.next = self.range.start;
        }
        Some(index)
    }
}

/// Counters kept by one writer loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterReport {
    pub writes: u64,
    pub dropped_oldest: u64,
    pub rejected: u64,
}

impl WriterReport {
    fn record(&mut self, delivery: Delivery) {
        self.writes += 1;
        match delivery {
            Delivery::Published => {}
            Delivery::DroppedOldest => self.dropped_oldest += 1,
            Delivery::Rejected => self.rejected += 1,
        }
    }
}

/// A publisher bound to a record source and a slot range it owns
pub struct Writer<S: RecordSource> {
    name: String,
    publisher: Publisher,
    source: S,
    cursor: IndexCursor,
    interval: Duration,
}

impl<S: RecordSource> Writer<S> {
    /// `indices` must lie inside `S::Record`'s table and must not overlap
    /// any other writer's range
    pub fn new(
        name: impl Into<String>,
        bus: Arc<Bus>,
        source: S,
        indices: Range<usize>,
        interval: Duration,
    ) -> Result<Self> {
        let table = <S::Record as Record>::TABLE;
        let capacity = bus.store().capacity(table);
        if indices.end > capacity {
            return Err(BusError::IndexOutOfBounds {
                table,
                index: indices.end - 1,
                capacity,
            });
        }

        Ok(Self {
            name: name.into(),
            publisher: Publisher::new(bus),
            source,
            cursor: IndexCursor::new(indices)?,
            interval,
        })
    }

    /// One publisher cycle on the next slot
    pub fn step(&mut self) -> Result<PublishReceipt> {
        let index = self.cursor.next().unwrap_or(self.cursor.range().start);
        let record = self.source.next_record(index);
        let receipt = self.publisher.upsert(index, record)?;
        tracing::trace!(
            module = %self.name,
            event = %receipt.event,
            %record,
            "SNAPSHOT"
        );
        Ok(receipt)
    }

    /// Cycle until `shutdown` is set, sleeping `interval` between writes
    pub fn run(mut self, shutdown: &AtomicBool) -> Result<WriterReport> {
        let table = <S::Record as Record>::TABLE;
        tracing::info!(
            module = %self.name,
            %table,
            range = ?self.cursor.range(),
            "starting writer"
        );

        let started = Instant::now();
        let mut report = WriterReport::default();

        while !shutdown.load(Ordering::Acquire) {
            let receipt = self.step()?;
            report.record(receipt.delivery);

            if report.writes % PROGRESS_EVERY == 0 {
                tracing::info!(
                    module = %self.name,
                    elapsed_secs = started.elapsed().as_secs(),
                    writes = report.writes,
                    "writer active"
                );
            }

            thread::sleep(self.interval);
        }

        tracing::info!(module = %self.name, writes = report.writes, "writer shutting down");
        Ok(report)
    }
}
