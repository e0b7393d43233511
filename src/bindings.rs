//! C Bindings for ShmBus
//!
//! Raw C API over a [`Bus`]. Null handles and pointers are reported as
//! `-1` (invalid argument), distinct from the runtime full/empty results.

use std::os::raw::c_int;
use std::ptr;
use std::sync::Arc;

use crate::bus::Bus;
use crate::channel::PublishOutcome;
use crate::config::BusConfig;
use crate::error::{BusError, Result};
use crate::event::{Event, Operation, TableId};
use crate::record::{Order, User, UserName, USER_NAME_LEN};

/// Invalid argument (null pointer, unknown code, bad index)
pub const SHMBUS_EINVAL: c_int = -1;
/// `shmbus_publish`: inserted
pub const SHMBUS_OK: c_int = 0;
/// `shmbus_publish`: inserted after evicting the oldest event
pub const SHMBUS_DROPPED_OLDEST: c_int = 1;
/// `shmbus_publish`: still full after one retry
pub const SHMBUS_STILL_FULL: c_int = 2;

// Opaque handle
pub struct ShmBusHandle(Arc<Bus>);

#[repr(C)]
pub struct ShmBusConfig {
    pub channel_capacity: usize,
    pub orders_capacity: usize,
    pub users_capacity: usize,
}

/// C view of an [`Event`]
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawEvent {
    pub table_id: u8,
    pub index: u16,
    pub op: u8,
    pub version: u32,
}

impl From<Event> for RawEvent {
    fn from(event: Event) -> Self {
        Self {
            table_id: event.table.code(),
            index: event.index,
            op: event.op.code(),
            version: event.version,
        }
    }
}

impl TryFrom<RawEvent> for Event {
    type Error = BusError;

    fn try_from(raw: RawEvent) -> Result<Self> {
        Ok(Event::new(
            TableId::from_raw(raw.table_id)?,
            raw.index,
            Operation::from_raw(raw.op)?,
            raw.version,
        ))
    }
}

/// C view of an order slot
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawOrder {
    pub id: u64,
    pub version: u32,
    pub qty: i32,
    pub price: f32,
}

/// C view of a user slot
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawUser {
    pub id: u64,
    pub version: u32,
    pub name: [u8; USER_NAME_LEN],
}

/// Create a bus
///
/// Returns null if the configuration is invalid.
#[no_mangle]
pub extern "C" fn shmbus_create(config: ShmBusConfig) -> *mut ShmBusHandle {
    let config = BusConfig {
        channel_capacity: config.channel_capacity,
        orders_capacity: config.orders_capacity,
        users_capacity: config.users_capacity,
    };

    match Bus::shared(config) {
        Ok(bus) => Box::into_raw(Box::new(ShmBusHandle(bus))),
        Err(err) => {
            tracing::error!(%err, "shmbus_create failed");
            ptr::null_mut()
        }
    }
}

/// Destroy a bus handle
///
/// # Safety
/// `handle` must come from [`shmbus_create`] and not be used afterwards
#[no_mangle]
pub unsafe extern "C" fn shmbus_destroy(handle: *mut ShmBusHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// Publish an event
///
/// Returns [`SHMBUS_OK`], [`SHMBUS_DROPPED_OLDEST`], [`SHMBUS_STILL_FULL`]
/// or [`SHMBUS_EINVAL`]. An event whose index is outside its table is
/// rejected with [`SHMBUS_EINVAL`] and never reaches the channel.
///
/// # Safety
/// Non-null pointers must be valid for the duration of the call
#[no_mangle]
pub unsafe extern "C" fn shmbus_publish(handle: *const ShmBusHandle, event: *const RawEvent) -> c_int {
    let (Some(handle), Some(raw)) = (handle.as_ref(), event.as_ref()) else {
        return SHMBUS_EINVAL;
    };
    let Ok(event) = Event::try_from(*raw) else {
        return SHMBUS_EINVAL;
    };
    if usize::from(event.index) >= handle.0.store().capacity(event.table) {
        return SHMBUS_EINVAL;
    }

    match handle.0.channel().publish(event) {
        Ok(PublishOutcome::Published) => SHMBUS_OK,
        Ok(PublishOutcome::DroppedOldest) => SHMBUS_DROPPED_OLDEST,
        Err(err) if err.is_transient() => SHMBUS_STILL_FULL,
        Err(_) => SHMBUS_EINVAL,
    }
}

/// Take the oldest event
///
/// Returns 1 and fills `out` if an event was available, 0 if empty,
/// [`SHMBUS_EINVAL`] on null arguments.
///
/// # Safety
/// Non-null pointers must be valid for the duration of the call
#[no_mangle]
pub unsafe extern "C" fn shmbus_try_consume(handle: *const ShmBusHandle, out: *mut RawEvent) -> c_int {
    let (Some(handle), Some(out)) = (handle.as_ref(), out.as_mut()) else {
        return SHMBUS_EINVAL;
    };

    match handle.0.channel().try_consume() {
        Some(event) => {
            *out = event.into();
            1
        }
        None => 0,
    }
}

/// Read channel counters; any output pointer may be null
///
/// # Safety
/// Non-null pointers must be valid for the duration of the call
#[no_mangle]
pub unsafe extern "C" fn shmbus_stats(
    handle: *const ShmBusHandle,
    published: *mut u64,
    consumed: *mut u64,
    drops: *mut u64,
    rejected: *mut u64,
) -> c_int {
    let Some(handle) = handle.as_ref() else {
        return SHMBUS_EINVAL;
    };
    let stats = handle.0.stats();
    for (out, value) in [
        (published, stats.published),
        (consumed, stats.consumed),
        (drops, stats.drops),
        (rejected, stats.rejected),
    ] {
        if let Some(out) = out.as_mut() {
            *out = value;
        }
    }
    0
}

/// Write an order; returns the new version (> 0) or [`SHMBUS_EINVAL`]
///
/// # Safety
/// `handle` must be null or valid
#[no_mangle]
pub unsafe extern "C" fn shmbus_write_order(
    handle: *const ShmBusHandle,
    index: usize,
    id: u64,
    qty: i32,
    price: f32,
) -> i64 {
    let Some(handle) = handle.as_ref() else {
        return i64::from(SHMBUS_EINVAL);
    };
    match handle.0.store().orders().write(index, &Order { id, qty, price }) {
        Ok(version) => i64::from(version),
        Err(_) => i64::from(SHMBUS_EINVAL),
    }
}

/// Copy an order slot out; 1 if occupied, 0 if empty
///
/// # Safety
/// Non-null pointers must be valid for the duration of the call
#[no_mangle]
pub unsafe extern "C" fn shmbus_read_order(
    handle: *const ShmBusHandle,
    index: usize,
    out: *mut RawOrder,
) -> c_int {
    let (Some(handle), Some(out)) = (handle.as_ref(), out.as_mut()) else {
        return SHMBUS_EINVAL;
    };
    let Ok(snap) = handle.0.store().orders().read(index) else {
        return SHMBUS_EINVAL;
    };

    *out = RawOrder {
        id: snap.record.id,
        version: snap.version,
        qty: snap.record.qty,
        price: snap.record.price,
    };
    c_int::from(!snap.is_empty())
}

/// Write a user; `name` is a NUL-terminated string (truncated to 31 bytes)
///
/// # Safety
/// Non-null pointers must be valid; `name` must be NUL-terminated
#[no_mangle]
pub unsafe extern "C" fn shmbus_write_user(
    handle: *const ShmBusHandle,
    index: usize,
    id: u64,
    name: *const std::os::raw::c_char,
) -> i64 {
    let Some(handle) = handle.as_ref() else {
        return i64::from(SHMBUS_EINVAL);
    };
    if name.is_null() {
        return i64::from(SHMBUS_EINVAL);
    }
    let name = std::ffi::CStr::from_ptr(name).to_string_lossy();
    let user = User {
        id,
        name: UserName::new(&name),
    };

    match handle.0.store().users().write(index, &user) {
        Ok(version) => i64::from(version),
        Err(_) => i64::from(SHMBUS_EINVAL),
    }
}

/// Copy a user slot out; 1 if occupied, 0 if empty
///
/// # Safety
/// Non-null pointers must be valid for the duration of the call
#[no_mangle]
pub unsafe extern "C" fn shmbus_read_user(
    handle: *const ShmBusHandle,
    index: usize,
    out: *mut RawUser,
) -> c_int {
    let (Some(handle), Some(out)) = (handle.as_ref(), out.as_mut()) else {
        return SHMBUS_EINVAL;
    };
    let Ok(snap) = handle.0.store().users().read(index) else {
        return SHMBUS_EINVAL;
    };

    *out = RawUser {
        id: snap.record.id,
        version: snap.version,
        name: *snap.record.name.as_bytes(),
    };
    c_int::from(!snap.is_empty())
}
