//! The shared context every publisher and consumer holds
//!
//! One [`Bus`] is built at startup and handed out as `Arc<Bus>`; there is
//! no global state.

use std::sync::Arc;

use crate::channel::{ChannelStats, EventChannel};
use crate::config::BusConfig;
use crate::error::Result;
use crate::store::RecordStore;

/// Record store plus the channel announcing its changes
pub struct Bus {
    config: BusConfig,
    store: RecordStore,
    channel: EventChannel,
}

impl Bus {
    pub fn new(config: BusConfig) -> Result<Self> {
        config.validate()?;
        let store = RecordStore::new(&config)?;
        let channel = EventChannel::new(config.channel_capacity)?;
        Ok(Self {
            config,
            store,
            channel,
        })
    }

    /// Build a bus ready to be shared across threads
    pub fn shared(config: BusConfig) -> Result<Arc<Self>> {
        Self::new(config).map(Arc::new)
    }

    #[inline(always)]
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    #[inline(always)]
    pub fn channel(&self) -> &EventChannel {
        &self.channel
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn stats(&self) -> ChannelStats {
        self.channel.stats()
    }
}
