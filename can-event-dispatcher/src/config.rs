//! Dispatcher configuration types
//!
//! The static dimensioning of a dispatcher system and the settings of its dispatchers.
//! Both types can be deserialized, so that an integration may keep them in a
//! configuration file.

use crate::types::{DispatcherError, Result};
use serde::{Deserialize, Serialize};

/// Configuration of a dispatcher system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemConfig {
    /// Number of dispatchers in the system
    #[serde(default = "default_no_dispatchers")]
    pub no_dispatchers: usize,

    /// Capacity of the table of external event sources
    #[serde(default = "default_max_sources")]
    pub max_external_sources: usize,

    /// Capacity of the table of internal event sources
    #[serde(default = "default_max_sources")]
    pub max_internal_sources: usize,

    /// Verify that each event is delivered to the dispatcher that registered its source
    #[serde(default = "default_check_delivery")]
    pub check_event_delivery: bool,
}

fn default_no_dispatchers() -> usize {
    1
}

fn default_max_sources() -> usize {
    64
}

fn default_check_delivery() -> bool {
    cfg!(debug_assertions)
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            no_dispatchers: default_no_dispatchers(),
            max_external_sources: default_max_sources(),
            max_internal_sources: default_max_sources(),
            check_event_delivery: default_check_delivery(),
        }
    }
}

impl SystemConfig {
    /// Create a new system configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the number of dispatchers
    pub fn with_dispatchers(mut self, no_dispatchers: usize) -> Self {
        self.no_dispatchers = no_dispatchers;
        self
    }

    /// Builder method: set the capacity of the external event source table
    pub fn with_max_external_sources(mut self, max: usize) -> Self {
        self.max_external_sources = max;
        self
    }

    /// Builder method: set the capacity of the internal event source table
    pub fn with_max_internal_sources(mut self, max: usize) -> Self {
        self.max_internal_sources = max;
        self
    }

    /// Builder method: enable or disable the delivery check
    pub fn with_delivery_check(mut self, enabled: bool) -> Self {
        self.check_event_delivery = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.no_dispatchers == 0 {
            return Err(DispatcherError::InvalidConfig(
                "a dispatcher system needs at least one dispatcher".into(),
            ));
        }
        if self.max_external_sources == 0 && self.max_internal_sources == 0 {
            return Err(DispatcherError::InvalidConfig(
                "a dispatcher system needs room for at least one event source".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration of a single dispatcher
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Period in milliseconds at which the integration calls `dispatcher_main`
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u32,

    /// Optional name, used in log output
    #[serde(default)]
    pub name: Option<String>,
}

fn default_tick_ms() -> u32 {
    10
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            name: None,
        }
    }
}

impl DispatcherConfig {
    /// Create a new dispatcher configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the tick in milliseconds
    pub fn with_tick_ms(mut self, tick_ms: u32) -> Self {
        self.tick_ms = tick_ms;
        self
    }

    /// Builder method: set the name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_ms == 0 {
            return Err(DispatcherError::InvalidConfig(
                "the dispatcher tick must be at least 1 ms".into(),
            ));
        }
        Ok(())
    }

    /// Convert a duration in milliseconds into ticks, rounded to the nearest tick but at
    /// least one tick
    pub fn ms_to_ticks(&self, ti_ms: u32) -> u64 {
        let tick = u64::from(self.tick_ms);
        ((u64::from(ti_ms) + tick / 2) / tick).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_config_builder() {
        let config = SystemConfig::new()
            .with_dispatchers(3)
            .with_max_external_sources(100)
            .with_max_internal_sources(5)
            .with_delivery_check(true);

        assert_eq!(config.no_dispatchers, 3);
        assert_eq!(config.max_external_sources, 100);
        assert_eq!(config.max_internal_sources, 5);
        assert!(config.check_event_delivery);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_system_config() {
        assert!(SystemConfig::new().with_dispatchers(0).validate().is_err());
        let no_sources = SystemConfig::new()
            .with_max_external_sources(0)
            .with_max_internal_sources(0);
        assert!(no_sources.validate().is_err());
    }

    #[test]
    fn test_tick_rounding() {
        let config = DispatcherConfig::new().with_tick_ms(10);
        assert_eq!(config.ms_to_ticks(100), 10);
        assert_eq!(config.ms_to_ticks(104), 10);
        assert_eq!(config.ms_to_ticks(105), 11);
        assert_eq!(config.ms_to_ticks(0), 1);
        assert_eq!(config.ms_to_ticks(3), 1);
        assert!(DispatcherConfig::new().with_tick_ms(0).validate().is_err());
    }
}
