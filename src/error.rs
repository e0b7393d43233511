//! Error types for ShmBus

use std::io;
use thiserror::Error;

use crate::event::TableId;

/// Result type for ShmBus operations
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur in ShmBus operations
#[derive(Debug, Error)]
pub enum BusError {
    /// A caller handed in something unusable (null pointer, unknown code)
    #[error("Invalid argument: {what}")]
    InvalidArgument { what: &'static str },

    /// Slot index outside the table
    #[error("Index {index} out of bounds for table {table} (capacity {capacity})")]
    IndexOutOfBounds {
        table: TableId,
        index: usize,
        capacity: usize,
    },

    /// Channel still full after the single eviction attempt
    #[error("Event channel is full")]
    ChannelFull,

    /// Capacity rejected at construction
    #[error("Invalid {what} capacity: {got}")]
    InvalidCapacity { what: &'static str, got: usize },

    /// Configuration value could not be parsed
    #[error("Invalid value for {key}: {value:?}")]
    InvalidConfig { key: &'static str, value: String },

    /// Failed to spawn a module thread
    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    /// A module thread panicked before it could be joined cleanly
    #[error("Thread '{name}' panicked")]
    ThreadPanicked { name: String },
}

impl BusError {
    /// Whether the error is transient load rather than a caller bug
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, BusError::ChannelFull)
    }
}
