//! Change descriptors carried on the event channel
//!
//! An [`Event`] never carries a record payload. It tells a consumer
//! "re-read `table[index]`, something changed as of `version`".
//!
//! Events pack into a single `u64` so a channel slot can hold one in an
//! atomic word:
//!
//! ```text
//!  63            32 31       16 15    8 7     0
//! ┌────────────────┬───────────┬───────┬───────┐
//! │    version     │   index   │  op   │ table │
//! └────────────────┴───────────┴───────┴───────┘
//! ```

use std::fmt;

use crate::error::{BusError, Result};

/// Logical tables in the record store
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableId {
    Orders = 1,
    Users = 2,
}

impl TableId {
    /// All tables, in code order
    pub const ALL: [TableId; 2] = [TableId::Orders, TableId::Users];

    /// Decode a raw table code
    pub fn from_raw(code: u8) -> Result<Self> {
        match code {
            1 => Ok(TableId::Orders),
            2 => Ok(TableId::Users),
            _ => Err(BusError::InvalidArgument {
                what: "unknown table id",
            }),
        }
    }

    #[inline(always)]
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            TableId::Orders => "orders",
            TableId::Users => "users",
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of change an event announces
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Upsert = 1,
    Delete = 2,
}

impl Operation {
    /// Decode a raw operation code
    pub fn from_raw(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Operation::Upsert),
            2 => Ok(Operation::Delete),
            _ => Err(BusError::InvalidArgument {
                what: "unknown operation",
            }),
        }
    }

    #[inline(always)]
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Upsert => f.write_str("UPSERT"),
            Operation::Delete => f.write_str("DELETE"),
        }
    }
}

/// Compact change descriptor `{table, index, operation, version}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event {
    pub table: TableId,
    pub index: u16,
    pub op: Operation,
    /// Record version right after the write that produced this event
    pub version: u32,
}

impl Event {
    pub fn new(table: TableId, index: u16, op: Operation, version: u32) -> Self {
        Self {
            table,
            index,
            op,
            version,
        }
    }

    pub fn upsert(table: TableId, index: u16, version: u32) -> Self {
        Self::new(table, index, Operation::Upsert, version)
    }

    pub fn delete(table: TableId, index: u16, version: u32) -> Self {
        Self::new(table, index, Operation::Delete, version)
    }

    /// Pack into the slot word
    #[inline]
    pub fn to_bits(self) -> u64 {
        (u64::from(self.version) << 32)
            | (u64::from(self.index) << 16)
            | (u64::from(self.op.code()) << 8)
            | u64::from(self.table.code())
    }

    /// Unpack a slot word
    ///
    /// Fails with [`BusError::InvalidArgument`] if the table or operation
    /// code is unknown.
    #[inline]
    pub fn from_bits(bits: u64) -> Result<Self> {
        Ok(Self {
            table: TableId::from_raw(bits as u8)?,
            op: Operation::from_raw((bits >> 8) as u8)?,
            index: (bits >> 16) as u16,
            version: (bits >> 32) as u32,
        })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "table={} idx={} op={} ver={}",
            self.table.code(),
            self.index,
            self.op,
            self.version
        )
    }
}
