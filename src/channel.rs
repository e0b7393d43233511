//! Lock-Free Bounded MPMC Event Channel
//!
//! Any number of publishers and consumers share one fixed ring of
//! [`Event`] slots. Neither side ever blocks: when the ring is full a
//! publisher evicts the oldest unread event instead of waiting.
//!
//! # Design
//! - `head` / `tail` are monotonic positions; slot = position & mask
//! - Each slot carries a sequence word that hands it between producer and
//!   consumer (`pos` = free for the producer of `pos`, `pos + 1` = event
//!   ready, `pos + capacity` = vacated for the next lap)
//! - Events live in a single `AtomicU64`, so a slot is never read torn
//! - At most `capacity - 1` events are unread at any time
//! - Overflow: the publisher that claims the position past a full ring
//!   evicts `tail` itself with one CAS; if the ring cannot take the event
//!   after one re-check it reports [`BusError::ChannelFull`]

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{BusError, Result};
use crate::event::Event;

/// Cache line size
const CACHE_LINE_SIZE: usize = 64;

/// Keeps `head`, `tail` and each counter on their own cache line
#[repr(C, align(64))]
struct CachePadded<T>(T);

const _: () = assert!(std::mem::align_of::<CachePadded<AtomicU64>>() == CACHE_LINE_SIZE);

/// A single ring slot
struct Slot {
    /// Hand-off sequence (see module docs)
    sequence: AtomicU64,
    /// Packed [`Event`]
    bits: AtomicU64,
}

/// How a successful publish went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Inserted without touching unread events
    Published,
    /// Inserted after evicting the oldest unread event
    DroppedOldest,
}

impl PublishOutcome {
    #[inline]
    pub fn dropped(self) -> bool {
        self == PublishOutcome::DroppedOldest
    }
}

/// Monotonic channel counters
///
/// Each field reflects every operation completed before the read, but the
/// four are loaded independently, not as one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Events inserted (including those that later got evicted)
    pub published: u64,
    /// Events handed to consumers
    pub consumed: u64,
    /// Events evicted by the drop-oldest policy
    pub drops: u64,
    /// Publishes refused with [`BusError::ChannelFull`]
    pub rejected: u64,
}

/// Bounded lock-free MPMC ring with drop-oldest overflow
pub struct EventChannel {
    /// Next position a producer claims
    head: CachePadded<AtomicU64>,
    /// Next position a consumer claims
    tail: CachePadded<AtomicU64>,
    published: CachePadded<AtomicU64>,
    consumed: CachePadded<AtomicU64>,
    drops: CachePadded<AtomicU64>,
    rejected: CachePadded<AtomicU64>,
    slots: Box<[Slot]>,
    mask: u64,
}

impl EventChannel {
    /// Create a channel with `capacity` slots (`capacity - 1` usable)
    ///
    /// `capacity` must be a power of two and at least 2.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(BusError::InvalidCapacity {
                what: "channel",
                got: capacity,
            });
        }

        let slots = (0..capacity as u64)
            .map(|pos| Slot {
                sequence: AtomicU64::new(pos),
                bits: AtomicU64::new(0),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            head: CachePadded(AtomicU64::new(0)),
            tail: CachePadded(AtomicU64::new(0)),
            published: CachePadded(AtomicU64::new(0)),
            consumed: CachePadded(AtomicU64::new(0)),
            drops: CachePadded(AtomicU64::new(0)),
            rejected: CachePadded(AtomicU64::new(0)),
            slots,
            mask: capacity as u64 - 1,
        })
    }

    /// Total number of slots
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Maximum number of unread events
    #[inline(always)]
    pub fn usable(&self) -> usize {
        self.slots.len() - 1
    }

    #[inline(always)]
    fn slot(&self, pos: u64) -> &Slot {
        &self.slots[(pos & self.mask) as usize]
    }

    /// Insert `event`, evicting the oldest unread event if the ring is full
    ///
    /// Never blocks. A publisher that finds the ring exactly full claims the
    /// next position and evicts `tail` for itself, so every drop is reported
    /// by the publish that caused it. Returns [`BusError::ChannelFull`] when
    /// the ring still cannot take the event after one re-check: the oldest
    /// event is mid-write, another publisher is mid-eviction, or the slot at
    /// `head` has not been vacated by its previous consumer. Losing a race
    /// for `head` to another producer is not a failure; the claim is simply
    /// retried against the new `head`.
    pub fn publish(&self, event: Event) -> Result<PublishOutcome> {
        let bits = event.to_bits();
        let usable = self.usable() as u64;
        let mut rechecked = false;

        loop {
            let head = self.head.0.load(Ordering::Relaxed);
            let tail = self.tail.0.load(Ordering::Acquire);
            // head was read first, so it may trail tail; that reads as "not full"
            let used = head.saturating_sub(tail);
            let full = used >= usable;

            if full && (used > usable || !self.is_ready(tail)) {
                if rechecked {
                    return Err(self.reject());
                }
                rechecked = true;
                continue;
            }

            let slot = self.slot(head);
            let seq = slot.sequence.load(Ordering::Acquire);

            if seq == head {
                if self
                    .head
                    .0
                    .compare_exchange_weak(head, head + 1, Ordering::Relaxed, Ordering::Relaxed)
                    .is_err()
                {
                    continue;
                }

                // Our claim overfilled the ring by one unless a consumer
                // moved tail since; the eviction fails harmlessly then
                let evicted = full && self.evict(tail);

                slot.bits.store(bits, Ordering::Relaxed);
                // Payload visible before the slot reads as ready
                slot.sequence.store(head + 1, Ordering::Release);
                self.published.0.fetch_add(1, Ordering::Relaxed);

                return Ok(if evicted {
                    PublishOutcome::DroppedOldest
                } else {
                    PublishOutcome::Published
                });
            }

            if seq < head {
                // Previous lap's consumer has claimed the slot but not vacated it yet
                return Err(self.reject());
            }

            // seq > head: another producer claimed this position, reload
        }
    }

    /// Event at `pos` is fully written and unclaimed
    #[inline(always)]
    fn is_ready(&self, pos: u64) -> bool {
        self.slot(pos).sequence.load(Ordering::Acquire) == pos + 1
    }

    /// Evict the event at `tail`; `false` if the slot wasn't ready or the CAS lost
    fn evict(&self, tail: u64) -> bool {
        if !self.is_ready(tail) {
            return false;
        }

        if self
            .tail
            .0
            .compare_exchange(tail, tail + 1, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        self.slot(tail)
            .sequence
            .store(tail + self.capacity() as u64, Ordering::Release);
        self.drops.0.fetch_add(1, Ordering::Relaxed);
        true
    }

    #[inline]
    fn reject(&self) -> BusError {
        self.rejected.0.fetch_add(1, Ordering::Relaxed);
        BusError::ChannelFull
    }

    /// Remove and return the oldest unread event
    ///
    /// Returns `None` without blocking when nothing is ready, which includes
    /// a slot whose producer has claimed it but not finished writing.
    pub fn try_consume(&self) -> Option<Event> {
        loop {
            let tail = self.tail.0.load(Ordering::Relaxed);
            let slot = self.slot(tail);
            let seq = slot.sequence.load(Ordering::Acquire);
            let ready = tail + 1;

            if seq == ready {
                if self
                    .tail
                    .0
                    .compare_exchange_weak(tail, ready, Ordering::Release, Ordering::Relaxed)
                    .is_err()
                {
                    continue;
                }

                let bits = slot.bits.load(Ordering::Relaxed);
                slot.sequence
                    .store(tail + self.capacity() as u64, Ordering::Release);
                self.consumed.0.fetch_add(1, Ordering::Relaxed);

                // Only publish() writes slots, and it only writes valid events
                return match Event::from_bits(bits) {
                    Ok(event) => Some(event),
                    Err(err) => {
                        tracing::error!(%err, bits, "corrupt event slot");
                        None
                    }
                };
            }

            if seq < ready {
                return None;
            }

            // seq > ready: tail moved under us, reload
        }
    }

    /// Drain everything currently readable into `out`, returning the count
    pub fn drain_into(&self, out: &mut Vec<Event>) -> usize {
        let before = out.len();
        while let Some(event) = self.try_consume() {
            out.push(event);
        }
        out.len() - before
    }

    /// Approximate number of unread events, never above [`usable`](Self::usable)
    #[inline]
    pub fn len(&self) -> usize {
        // head first: a newer tail can only shrink the difference
        let head = self.head.0.load(Ordering::Acquire);
        let tail = self.tail.0.load(Ordering::Acquire);
        // An evicting publisher holds one extra claim until its eviction lands
        (head.saturating_sub(tail) as usize).min(self.usable())
    }

    /// `head == tail` at the moment of the check
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current counters
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            published: self.published.0.load(Ordering::Relaxed),
            consumed: self.consumed.0.load(Ordering::Relaxed),
            drops: self.drops.0.load(Ordering::Relaxed),
            rejected: self.rejected.0.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TableId;

    fn order_event(index: u16, version: u32) -> Event {
        Event::upsert(TableId::Orders, index, version)
    }

    #[test]
    fn test_capacity_validation() {
        assert!(EventChannel::new(0).is_err());
        assert!(EventChannel::new(1).is_err());
        assert!(EventChannel::new(6).is_err());
        assert!(matches!(
            EventChannel::new(1000),
            Err(BusError::InvalidCapacity { got: 1000, .. })
        ));

        let ch = EventChannel::new(2).unwrap();
        assert_eq!(ch.capacity(), 2);
        assert_eq!(ch.usable(), 1);
    }

    #[test]
    fn test_fresh_channel_is_empty() {
        let ch = EventChannel::new(8).unwrap();
        assert!(ch.is_empty());
        assert_eq!(ch.try_consume(), None);
        assert_eq!(ch.stats(), ChannelStats::default());
    }

    #[test]
    fn test_drop_oldest_scenario() {
        let ch = EventChannel::new(4).unwrap();
        let events: Vec<Event> = (1..=4).map(|v| order_event(v as u16, v)).collect();

        assert_eq!(ch.publish(events[0]).unwrap(), PublishOutcome::Published);
        assert_eq!(ch.publish(events[1]).unwrap(), PublishOutcome::Published);
        assert_eq!(ch.publish(events[2]).unwrap(), PublishOutcome::Published);
        assert_eq!(ch.publish(events[3]).unwrap(), PublishOutcome::DroppedOldest);

        assert_eq!(ch.stats().drops, 1);

        let mut drained = Vec::new();
        assert_eq!(ch.drain_into(&mut drained), 3);
        assert_eq!(drained, events[1..].to_vec());
        assert_eq!(ch.try_consume(), None);

        let stats = ch.stats();
        assert_eq!(stats.published, 4);
        assert_eq!(stats.consumed, 3);
        assert_eq!(stats.drops, 1);
        assert_eq!(stats.rejected, 0);
    }

    #[test]
    fn test_full_boundary_drops_exactly_one() {
        let ch = EventChannel::new(16).unwrap();
        for v in 0..15 {
            assert_eq!(ch.publish(order_event(0, v)).unwrap(), PublishOutcome::Published);
        }
        assert_eq!(ch.len(), 15);

        let before = ch.stats().drops;
        assert!(ch.publish(order_event(0, 99)).unwrap().dropped());
        assert_eq!(ch.stats().drops, before + 1);
        assert_eq!(ch.len(), 15);
    }

    #[test]
    fn test_never_exceeds_usable() {
        let ch = EventChannel::new(8).unwrap();
        for v in 0..100 {
            ch.publish(order_event((v % 7) as u16, v)).unwrap();
            assert!(ch.len() <= ch.usable());
        }
        assert_eq!(ch.stats().drops, 100 - 7);

        // Survivors are the newest seven, in order
        let mut drained = Vec::new();
        ch.drain_into(&mut drained);
        let versions: Vec<u32> = drained.iter().map(|e| e.version).collect();
        assert_eq!(versions, (93..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_wraparound_fifo() {
        let ch = EventChannel::new(4).unwrap();
        for round in 0..10u32 {
            for i in 0..3 {
                ch.publish(order_event(i as u16, round * 3 + i)).unwrap();
            }
            for i in 0..3 {
                assert_eq!(ch.try_consume().unwrap().version, round * 3 + i);
            }
            assert!(ch.is_empty());
        }
        assert_eq!(ch.stats().drops, 0);
    }

    #[test]
    fn test_accounting_identity() {
        let ch = EventChannel::new(32).unwrap();
        for v in 0..200 {
            ch.publish(order_event(1, v)).unwrap();
            if v % 3 == 0 {
                ch.try_consume();
            }
        }
        let stats = ch.stats();
        assert_eq!(
            stats.published,
            stats.consumed + stats.drops + ch.len() as u64
        );
    }

    #[test]
    fn test_full_with_oldest_mid_write_is_rejected() {
        let ch = EventChannel::new(4).unwrap();
        for v in 0..3 {
            ch.publish(order_event(0, v)).unwrap();
        }
        // Oldest event looks claimed by a producer that hasn't finished writing
        ch.slot(0).sequence.store(0, Ordering::Release);

        assert!(matches!(ch.publish(order_event(0, 9)), Err(BusError::ChannelFull)));
        let stats = ch.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.drops, 0);
        assert_eq!(stats.published, 3);
        assert_eq!(ch.len(), 3);
    }

    #[test]
    fn test_unvacated_head_slot_is_rejected() {
        let ch = EventChannel::new(4).unwrap();
        for v in 0..3 {
            ch.publish(order_event(0, v)).unwrap();
        }
        ch.try_consume().unwrap();
        ch.try_consume().unwrap();
        ch.publish(order_event(0, 3)).unwrap();

        // Position 4 reuses slot 0; pretend its consumer never released it
        ch.slot(4).sequence.store(1, Ordering::Release);

        assert!(matches!(ch.publish(order_event(0, 4)), Err(BusError::ChannelFull)));
        let stats = ch.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.drops, 0);
        assert_eq!(ch.len(), 2);
    }

    #[test]
    fn test_evictor_reports_its_own_drop() {
        let ch = EventChannel::new(2).unwrap();
        let mut dropped = 0;
        for v in 0..50 {
            if ch.publish(order_event(0, v)).unwrap().dropped() {
                dropped += 1;
            }
        }
        assert_eq!(dropped, 49);
        assert_eq!(ch.stats().drops, dropped);
        assert_eq!(ch.try_consume().unwrap().version, 49);
    }

    #[test]
    fn test_evict_skips_unready_slot() {
        let ch = EventChannel::new(4).unwrap();
        // Nothing published: slot 0 is not ready, nothing to evict
        assert!(!ch.evict(0));
        assert_eq!(ch.stats().drops, 0);
    }
}
