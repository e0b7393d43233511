//! ShmBus - lock-free record store with an event notification channel
//!
//! Writers mutate fixed-capacity record tables in place and announce each
//! mutation on a bounded multi-producer multi-consumer channel. Readers
//! drain the channel and re-read the named slot to get the current state.
//!
//! # Architecture
//!
//! - **Record store**: versioned slots, one writer per slot, lock-free reads
//! - **Event channel**: bounded ring, drop-oldest on overflow, never blocks
//! - **Runtime**: writer/reader thread pairs with a stats monitor
//!
//! # Consistency
//!
//! An event's version is a hint. A reader always sees that version or a
//! newer one, and may see a record torn by a concurrent write.

pub mod error;
pub mod event;
pub mod channel;
pub mod record;
pub mod store;
pub mod config;
pub mod bus;
pub mod publisher;
pub mod consumer;
pub mod workload;
pub mod runtime;
pub mod bindings;

pub use error::{BusError, Result};
pub use event::{Event, Operation, TableId};
pub use channel::{ChannelStats, EventChannel, PublishOutcome};
pub use record::{AnyRecord, Keyed, Order, Record, Snapshot, User, UserName};
pub use store::{RecordStore, Table};
pub use config::{BusConfig, RuntimeConfig};
pub use bus::Bus;
pub use publisher::{Delivery, PublishReceipt, Publisher, Writer, WriterReport};
pub use consumer::{Consumer, DrainSummary, EventSink, Reader, TracingSink, VersionTracker};
pub use runtime::{default_modules, ModuleSpec, RunReport, Runtime};
