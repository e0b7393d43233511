//! Versioned record slots
//!
//! Every slot pairs a payload with an atomic `version` that is bumped once
//! per write. The version is the only synchronization-relevant field:
//! payload fields are individually atomic (relaxed) so a reader racing a
//! writer may see a mix of old and new fields, but never undefined memory.
//!
//! A reader that acquires a version is guaranteed to see payload fields at
//! least as new as the write that produced it.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{fence, AtomicI32, AtomicU32, AtomicU64, Ordering};

use crate::event::TableId;

/// Fixed size of a user name, NUL padded
pub const USER_NAME_LEN: usize = 32;

/// Ensures the wrapped value is on its own cache line
#[repr(C, align(64))]
pub struct CacheAligned<T>(pub T);

/// Anything carrying a business key
pub trait Keyed {
    /// Business key; `0` marks a never-written (or deleted) slot
    fn id(&self) -> u64;
}

/// A fixed-shape record stored in one table
///
/// `Cells` is the lock-free in-memory form of the record; `store` and
/// `load` move a plain value in and out of it field by field.
pub trait Record:
    Keyed + Copy + Default + Send + Sync + Into<AnyRecord> + fmt::Display + 'static
{
    /// Table this record shape lives in
    const TABLE: TableId;

    /// Atomic storage for one record
    type Cells: Default + Send + Sync;

    fn store(cells: &Self::Cells, record: &Self);

    fn load(cells: &Self::Cells) -> Self;
}

/// An order row
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Order {
    pub id: u64,
    pub qty: i32,
    pub price: f32,
}

#[derive(Default)]
pub struct OrderCells {
    id: AtomicU64,
    qty: AtomicI32,
    price: AtomicU32,
}

impl Keyed for Order {
    #[inline(always)]
    fn id(&self) -> u64 {
        self.id
    }
}

impl Record for Order {
    const TABLE: TableId = TableId::Orders;
    type Cells = OrderCells;

    #[inline]
    fn store(cells: &OrderCells, record: &Self) {
        cells.id.store(record.id, Ordering::Relaxed);
        cells.qty.store(record.qty, Ordering::Relaxed);
        cells.price.store(record.price.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    fn load(cells: &OrderCells) -> Self {
        Self {
            id: cells.id.load(Ordering::Relaxed),
            qty: cells.qty.load(Ordering::Relaxed),
            price: f32::from_bits(cells.price.load(Ordering::Relaxed)),
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id={} qty={} price={:.1}", self.id, self.qty, self.price)
    }
}

/// Fixed 32-byte user name, NUL padded
///
/// At most 31 bytes of text are kept so the buffer always ends in NUL.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct UserName([u8; USER_NAME_LEN]);

impl UserName {
    pub fn new(name: &str) -> Self {
        let mut len = name.len().min(USER_NAME_LEN - 1);
        while !name.is_char_boundary(len) {
            len -= 1;
        }
        let mut buf = [0u8; USER_NAME_LEN];
        buf[..len].copy_from_slice(&name.as_bytes()[..len]);
        Self(buf)
    }

    pub fn from_bytes(bytes: [u8; USER_NAME_LEN]) -> Self {
        Self(bytes)
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8; USER_NAME_LEN] {
        &self.0
    }

    /// Text up to the first NUL, lossily decoded
    pub fn as_str(&self) -> Cow<'_, str> {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(USER_NAME_LEN);
        String::from_utf8_lossy(&self.0[..len])
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }
}

impl fmt::Debug for UserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for UserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

/// A user row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub name: UserName,
}

const NAME_WORDS: usize = USER_NAME_LEN / 8;

#[derive(Default)]
pub struct UserCells {
    id: AtomicU64,
    name: [AtomicU64; NAME_WORDS],
}

impl Keyed for User {
    #[inline(always)]
    fn id(&self) -> u64 {
        self.id
    }
}

impl Record for User {
    const TABLE: TableId = TableId::Users;
    type Cells = UserCells;

    fn store(cells: &UserCells, record: &Self) {
        cells.id.store(record.id, Ordering::Relaxed);
        for (word, chunk) in cells.name.iter().zip(record.name.0.chunks_exact(8)) {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            word.store(u64::from_le_bytes(bytes), Ordering::Relaxed);
        }
    }

    fn load(cells: &UserCells) -> Self {
        let mut name = [0u8; USER_NAME_LEN];
        for (word, chunk) in cells.name.iter().zip(name.chunks_exact_mut(8)) {
            chunk.copy_from_slice(&word.load(Ordering::Relaxed).to_le_bytes());
        }
        Self {
            id: cells.id.load(Ordering::Relaxed),
            name: UserName(name),
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id={} name={:?}", self.id, self.name.as_str())
    }
}

/// A record of either shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnyRecord {
    Order(Order),
    User(User),
}

impl AnyRecord {
    pub fn table(&self) -> TableId {
        match self {
            AnyRecord::Order(_) => TableId::Orders,
            AnyRecord::User(_) => TableId::Users,
        }
    }
}

impl Keyed for AnyRecord {
    fn id(&self) -> u64 {
        match self {
            AnyRecord::Order(order) => order.id,
            AnyRecord::User(user) => user.id,
        }
    }
}

impl From<Order> for AnyRecord {
    fn from(order: Order) -> Self {
        AnyRecord::Order(order)
    }
}

impl From<User> for AnyRecord {
    fn from(user: User) -> Self {
        AnyRecord::User(user)
    }
}

impl fmt::Display for AnyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnyRecord::Order(order) => fmt::Display::fmt(order, f),
            AnyRecord::User(user) => fmt::Display::fmt(user, f),
        }
    }
}

/// A copy of one slot: version plus payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot<R> {
    pub version: u32,
    pub record: R,
}

impl<R: Keyed> Snapshot<R> {
    /// `id == 0`: never written, or deleted
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.record.id() == 0
    }
}

impl<R: Into<AnyRecord>> Snapshot<R> {
    pub fn erase(self) -> Snapshot<AnyRecord> {
        Snapshot {
            version: self.version,
            record: self.record.into(),
        }
    }
}

/// One table slot: version counter plus payload cells
pub struct RecordSlot<R: Record> {
    version: AtomicU32,
    cells: R::Cells,
}

impl<R: Record> Default for RecordSlot<R> {
    fn default() -> Self {
        Self {
            version: AtomicU32::new(0),
            cells: R::Cells::default(),
        }
    }
}

impl<R: Record> RecordSlot<R> {
    /// Overwrite the payload, then bump the version
    ///
    /// Callers must own the slot: concurrent writers to one slot can
    /// interleave their payload fields. Returns the new version.
    ///
    /// The counter is a plain `u32`: the write after version `u32::MAX`
    /// yields 0 and numbering starts over, so versions are only monotonic
    /// within one lap of the counter.
    #[inline]
    pub fn write(&self, record: &R) -> u32 {
        R::store(&self.cells, record);
        let version = self.version.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        // Payload must be visible before any event naming this version
        fence(Ordering::Release);
        version
    }

    /// Copy the slot out
    ///
    /// The version is loaded first, so the payload is never older than it.
    #[inline]
    pub fn read(&self) -> Snapshot<R> {
        let version = self.version.load(Ordering::Acquire);
        Snapshot {
            version,
            record: R::load(&self.cells),
        }
    }

    #[inline(always)]
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_write_read() {
        let slot = RecordSlot::<Order>::default();
        assert!(slot.read().is_empty());
        assert_eq!(slot.version(), 0);

        let order = Order {
            id: 9005,
            qty: 10,
            price: 100.0,
        };
        assert_eq!(slot.write(&order), 1);

        let snap = slot.read();
        assert_eq!(snap.version, 1);
        assert_eq!(snap.record, order);
    }

    #[test]
    fn test_version_wraps_after_u32_max() {
        let slot = RecordSlot::<Order>::default();
        slot.version.store(u32::MAX, Ordering::Relaxed);

        let order = Order {
            id: 9001,
            qty: 1,
            price: 1.0,
        };
        assert_eq!(slot.write(&order), 0);
        assert_eq!(slot.write(&order), 1);

        // Emptiness follows the id, not the version
        let snap = slot.read();
        assert_eq!(snap.version, 1);
        assert!(!snap.is_empty());
    }

    #[test]
    fn test_user_name_roundtrip_through_cells() {
        let slot = RecordSlot::<User>::default();
        let user = User {
            id: 2003,
            name: UserName::new("Diana_3"),
        };
        slot.write(&user);

        let snap = slot.read();
        assert_eq!(snap.record.name.as_str(), "Diana_3");
        assert_eq!(snap.record, user);
    }

    #[test]
    fn test_user_name_truncation() {
        let name = UserName::new("ThisIsAVeryLongUserNameThatShouldBeTruncated");
        assert_eq!(name.as_str().len(), USER_NAME_LEN - 1);
        assert_eq!(name.as_bytes()[USER_NAME_LEN - 1], 0);

        // Never split a multi-byte char
        let name = UserName::new(&"é".repeat(20));
        assert_eq!(name.as_str(), "é".repeat(15));
    }

    #[test]
    fn test_any_record() {
        let rec: AnyRecord = User::default().into();
        assert_eq!(rec.table(), TableId::Users);
        assert_eq!(rec.id(), 0);

        let snap = Snapshot {
            version: 3,
            record: Order {
                id: 1,
                qty: 2,
                price: 3.5,
            },
        }
        .erase();
        assert_eq!(snap.record.table(), TableId::Orders);
        assert_eq!(snap.record.to_string(), "id=1 qty=2 price=3.5");
        assert!(!snap.is_empty());
    }
}
