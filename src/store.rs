//! Fixed-capacity record tables
//!
//! A [`Table`] is a dense array of [`RecordSlot`]s addressed by index, never
//! resized after construction. [`RecordStore`] holds one table per
//! [`TableId`].
//!
//! Writes are lock-free and assume a single writer per `(table, index)`;
//! see [`RecordSlot::write`].

use crate::config::{BusConfig, MAX_TABLE_CAPACITY};
use crate::error::{BusError, Result};
use crate::event::TableId;
use crate::record::{AnyRecord, CacheAligned, Order, Record, RecordSlot, Snapshot, User};

/// Dense array of one record shape
pub struct Table<R: Record> {
    slots: Box<[CacheAligned<RecordSlot<R>>]>,
}

impl<R: Record> Table<R> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > MAX_TABLE_CAPACITY {
            return Err(BusError::InvalidCapacity {
                what: R::TABLE.name(),
                got: capacity,
            });
        }

        let slots = (0..capacity)
            .map(|_| CacheAligned(RecordSlot::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self { slots })
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn slot(&self, index: usize) -> Result<&RecordSlot<R>> {
        self.slots
            .get(index)
            .map(|slot| &slot.0)
            .ok_or(BusError::IndexOutOfBounds {
                table: R::TABLE,
                index,
                capacity: self.slots.len(),
            })
    }

    /// Overwrite `table[index]` and return the new version
    #[inline]
    pub fn write(&self, index: usize, record: &R) -> Result<u32> {
        Ok(self.slot(index)?.write(record))
    }

    /// Reset `table[index]` to the empty record and return the new version
    #[inline]
    pub fn delete(&self, index: usize) -> Result<u32> {
        Ok(self.slot(index)?.write(&R::default()))
    }

    /// Copy `table[index]` out; check [`Snapshot::is_empty`] before use
    #[inline]
    pub fn read(&self, index: usize) -> Result<Snapshot<R>> {
        Ok(self.slot(index)?.read())
    }

    /// Number of slots holding a record right now
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| !slot.0.read().is_empty()).count()
    }
}

/// All tables of the store
pub struct RecordStore {
    orders: Table<Order>,
    users: Table<User>,
}

impl RecordStore {
    pub fn new(config: &BusConfig) -> Result<Self> {
        Ok(Self {
            orders: Table::new(config.orders_capacity)?,
            users: Table::new(config.users_capacity)?,
        })
    }

    #[inline(always)]
    pub fn orders(&self) -> &Table<Order> {
        &self.orders
    }

    #[inline(always)]
    pub fn users(&self) -> &Table<User> {
        &self.users
    }

    pub fn capacity(&self, table: TableId) -> usize {
        match table {
            TableId::Orders => self.orders.capacity(),
            TableId::Users => self.users.capacity(),
        }
    }

    /// Write `record` into its table at `index`, returning the new version
    pub fn write(&self, index: usize, record: impl Into<AnyRecord>) -> Result<u32> {
        match record.into() {
            AnyRecord::Order(order) => self.orders.write(index, &order),
            AnyRecord::User(user) => self.users.write(index, &user),
        }
    }

    pub fn delete(&self, table: TableId, index: usize) -> Result<u32> {
        match table {
            TableId::Orders => self.orders.delete(index),
            TableId::Users => self.users.delete(index),
        }
    }

    pub fn read(&self, table: TableId, index: usize) -> Result<Snapshot<AnyRecord>> {
        match table {
            TableId::Orders => self.orders.read(index).map(Snapshot::erase),
            TableId::Users => self.users.read(index).map(Snapshot::erase),
        }
    }
}
