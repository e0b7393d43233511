//! Bus and runtime configuration
//!
//! Values come from `SHMBUS_*` environment variables, falling back to the
//! defaults below. The core only ever sees the resulting structs.

use std::time::Duration;

use crate::error::{BusError, Result};

/// Default event channel slots (1023 usable)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default orders table size
pub const DEFAULT_ORDERS_CAPACITY: usize = 128;

/// Default users table size
pub const DEFAULT_USERS_CAPACITY: usize = 64;

/// Largest table an event index can address
pub const MAX_TABLE_CAPACITY: usize = u16::MAX as usize + 1;

pub const ENV_CHANNEL_CAPACITY: &str = "SHMBUS_CHANNEL_CAPACITY";
pub const ENV_ORDERS_CAPACITY: &str = "SHMBUS_ORDERS_CAPACITY";
pub const ENV_USERS_CAPACITY: &str = "SHMBUS_USERS_CAPACITY";
pub const ENV_WRITERS_DISABLED: &str = "SHMBUS_WRITERS_DISABLED";
pub const ENV_HIGH_FREQUENCY: &str = "SHMBUS_HIGH_FREQUENCY";
pub const ENV_MONITOR_SECS: &str = "SHMBUS_MONITOR_SECS";

/// Sizes of the shared structures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Event channel slots, power of two
    pub channel_capacity: usize,
    /// Orders table slots
    pub orders_capacity: usize,
    /// Users table slots
    pub users_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            orders_capacity: DEFAULT_ORDERS_CAPACITY,
            users_capacity: DEFAULT_USERS_CAPACITY,
        }
    }
}

impl BusConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup, then validate
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            channel_capacity: parse_or(&lookup, ENV_CHANNEL_CAPACITY, defaults.channel_capacity)?,
            orders_capacity: parse_or(&lookup, ENV_ORDERS_CAPACITY, defaults.orders_capacity)?,
            users_capacity: parse_or(&lookup, ENV_USERS_CAPACITY, defaults.users_capacity)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity < 2 || !self.channel_capacity.is_power_of_two() {
            return Err(BusError::InvalidCapacity {
                what: "channel",
                got: self.channel_capacity,
            });
        }
        for (what, got) in [
            ("orders", self.orders_capacity),
            ("users", self.users_capacity),
        ] {
            if got == 0 || got > MAX_TABLE_CAPACITY {
                return Err(BusError::InvalidCapacity { what, got });
            }
        }
        Ok(())
    }
}

/// Knobs for the module runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Start readers only
    pub writers_disabled: bool,
    /// Shorter writer intervals
    pub high_frequency: bool,
    /// How often the monitor logs channel stats
    pub monitor_interval: Duration,
    /// Warn once total drops pass this
    pub drop_warning_threshold: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            writers_disabled: false,
            high_frequency: false,
            monitor_interval: Duration::from_secs(10),
            drop_warning_threshold: 100,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let monitor_secs: u64 = parse_or(
            &lookup,
            ENV_MONITOR_SECS,
            defaults.monitor_interval.as_secs(),
        )?;
        if monitor_secs == 0 {
            return Err(BusError::InvalidConfig {
                key: ENV_MONITOR_SECS,
                value: "0".to_string(),
            });
        }

        Ok(Self {
            writers_disabled: flag(&lookup, ENV_WRITERS_DISABLED),
            high_frequency: flag(&lookup, ENV_HIGH_FREQUENCY),
            monitor_interval: Duration::from_secs(monitor_secs),
            ..defaults
        })
    }
}

/// `"1"` switches a toggle on; anything else (or unset) leaves it off
fn flag<F>(lookup: &F, key: &str) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map_or(false, |v| v.trim() == "1")
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| BusError::InvalidConfig { key, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let bus = BusConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(bus, BusConfig::default());

        let rt = RuntimeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(rt, RuntimeConfig::default());
    }

    #[test]
    fn test_overrides() {
        let bus = BusConfig::from_lookup(lookup(&[
            (ENV_CHANNEL_CAPACITY, "64"),
            (ENV_ORDERS_CAPACITY, " 256 "),
        ]))
        .unwrap();
        assert_eq!(bus.channel_capacity, 64);
        assert_eq!(bus.orders_capacity, 256);
        assert_eq!(bus.users_capacity, DEFAULT_USERS_CAPACITY);

        let rt = RuntimeConfig::from_lookup(lookup(&[
            (ENV_WRITERS_DISABLED, "1"),
            (ENV_HIGH_FREQUENCY, "yes"),
            (ENV_MONITOR_SECS, "2"),
        ]))
        .unwrap();
        assert!(rt.writers_disabled);
        assert!(!rt.high_frequency);
        assert_eq!(rt.monitor_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            BusConfig::from_lookup(lookup(&[(ENV_CHANNEL_CAPACITY, "100")])),
            Err(BusError::InvalidCapacity { what: "channel", got: 100 })
        ));
        assert!(matches!(
            BusConfig::from_lookup(lookup(&[(ENV_USERS_CAPACITY, "lots")])),
            Err(BusError::InvalidConfig { key: ENV_USERS_CAPACITY, .. })
        ));
        assert!(BusConfig::from_lookup(lookup(&[(ENV_ORDERS_CAPACITY, "70000")])).is_err());
        assert!(RuntimeConfig::from_lookup(lookup(&[(ENV_MONITOR_SECS, "0")])).is_err());
    }
}
