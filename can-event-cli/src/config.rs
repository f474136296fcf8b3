//! Scenario configuration loading and validation

use anyhow::{bail, Context, Result};
use can_event_dispatcher::{DispatcherConfig, SystemConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Simulation scenario (loaded from scenario.toml)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub system: SystemConfig,
    pub dispatchers: Vec<DispatcherEntry>,
    #[serde(default)]
    pub messages: Vec<MessageConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Simulated time span in milliseconds
    #[serde(default = "default_duration")]
    pub duration_ms: u64,
    /// Run each dispatcher in a thread of its own, paced by the wall clock
    #[serde(default)]
    pub realtime: bool,
}

fn default_duration() -> u64 {
    2000
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            duration_ms: default_duration(),
            realtime: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatcherEntry {
    #[serde(flatten)]
    pub dispatcher: DispatcherConfig,
    /// Capacity of the CAN receive port
    #[serde(default = "default_port_capacity")]
    pub port_capacity: usize,
    /// Period of the status report timer; no report if not set
    pub status_period_ms: Option<u32>,
}

fn default_port_capacity() -> usize {
    32
}

/// A simulated CAN message
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageConfig {
    pub name: String,
    pub can_id: u32,
    /// Index of the dispatcher processing the message
    #[serde(default)]
    pub dispatcher: usize,
    pub period_ms: u32,
    /// Time of the first transmission
    #[serde(default)]
    pub phase_ms: u32,
    /// Reception timeout; defaults to three periods
    pub timeout_ms: Option<u32>,
    #[serde(default = "default_dlc")]
    pub dlc: usize,
    /// Time windows, in which the sender is silent
    #[serde(default)]
    pub outages: Vec<OutageConfig>,
}

fn default_dlc() -> usize {
    8
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct OutageConfig {
    pub from_ms: u64,
    pub to_ms: u64,
}

impl MessageConfig {
    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms.unwrap_or(self.period_ms.saturating_mul(3))
    }

    /// Check if the message is due for transmission at the given time
    pub fn is_sent_at(&self, t_ms: u64) -> bool {
        let phase = u64::from(self.phase_ms);
        let period = u64::from(self.period_ms);
        t_ms >= phase
            && (t_ms - phase) % period == 0
            && !self.outages.iter().any(|o| (o.from_ms..o.to_ms).contains(&t_ms))
    }
}

/// Load a scenario from a TOML file
pub fn load_config(path: &Path) -> Result<ScenarioConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file: {:?}", path))?;

    let config: ScenarioConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse scenario file: {:?}", path))?;

    validate(&config).with_context(|| format!("Invalid scenario file: {:?}", path))?;
    Ok(config)
}

/// Check the cross references of a scenario
pub fn validate(config: &ScenarioConfig) -> Result<()> {
    if config.dispatchers.len() != config.system.no_dispatchers {
        bail!(
            "{} dispatcher(s) configured but the system is dimensioned for {}",
            config.dispatchers.len(),
            config.system.no_dispatchers
        );
    }

    let mut ids = HashSet::new();
    for msg in &config.messages {
        if !ids.insert(msg.can_id) {
            bail!("CAN ID 0x{:X} is used by more than one message", msg.can_id);
        }
        if msg.dispatcher >= config.dispatchers.len() {
            bail!("Message {} refers to undefined dispatcher {}", msg.name, msg.dispatcher);
        }
        if msg.period_ms == 0 {
            bail!("Message {} has a period of 0 ms", msg.name);
        }
        if msg.dlc > 64 {
            bail!("Message {} has a DLC of {}", msg.name, msg.dlc);
        }
    }
    if config.messages.len() > config.system.max_external_sources {
        bail!(
            "{} messages exceed the capacity of {} external event sources",
            config.messages.len(),
            config.system.max_external_sources
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SCENARIO: &str = r#"
        [run]
        duration_ms = 500

        [system]
        no_dispatchers = 2

        [[dispatchers]]
        tick_ms = 10
        name = "fast"
        status_period_ms = 100

        [[dispatchers]]
        tick_ms = 50

        [[messages]]
        name = "EngineSpeed"
        can_id = 0x101
        period_ms = 20
        outages = [{ from_ms = 100, to_ms = 200 }]

        [[messages]]
        name = "Odometer"
        can_id = 0x3F0
        dispatcher = 1
        period_ms = 500
        phase_ms = 5
        timeout_ms = 2000
    "#;

    #[test]
    fn test_config_deserialization() {
        let config: ScenarioConfig = toml::from_str(SCENARIO).unwrap();
        assert_eq!(config.run.duration_ms, 500);
        assert!(!config.run.realtime);
        assert_eq!(config.dispatchers.len(), 2);
        assert_eq!(config.dispatchers[0].dispatcher.name.as_deref(), Some("fast"));
        assert_eq!(config.dispatchers[1].dispatcher.tick_ms, 50);
        assert_eq!(config.dispatchers[1].port_capacity, 32);
        assert_eq!(config.messages[0].timeout_ms(), 60);
        assert_eq!(config.messages[1].timeout_ms(), 2000);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_transmission_schedule() {
        let config: ScenarioConfig = toml::from_str(SCENARIO).unwrap();
        let engine = &config.messages[0];
        assert!(engine.is_sent_at(0));
        assert!(engine.is_sent_at(80));
        assert!(!engine.is_sent_at(90));
        assert!(!engine.is_sent_at(100));
        assert!(engine.is_sent_at(200));

        let odo = &config.messages[1];
        assert!(!odo.is_sent_at(0));
        assert!(odo.is_sent_at(5));
        assert!(odo.is_sent_at(505));
    }

    #[test]
    fn test_validation_errors() {
        let mut config: ScenarioConfig = toml::from_str(SCENARIO).unwrap();
        config.messages[1].can_id = 0x101;
        assert!(validate(&config).is_err());

        let mut config: ScenarioConfig = toml::from_str(SCENARIO).unwrap();
        config.messages[1].dispatcher = 2;
        assert!(validate(&config).is_err());

        let mut config: ScenarioConfig = toml::from_str(SCENARIO).unwrap();
        config.system.no_dispatchers = 1;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_default_timeout_of_long_periods() {
        let mut config: ScenarioConfig = toml::from_str(SCENARIO).unwrap();
        config.messages[0].period_ms = 2_000_000_000;
        assert!(validate(&config).is_ok());
        assert_eq!(config.messages[0].timeout_ms(), u32::MAX);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SCENARIO.as_bytes()).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.messages.len(), 2);

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        broken.write_all(b"[[dispatchers]]\ntick_ms = \"fast\"\n").unwrap();
        assert!(load_config(broken.path()).is_err());
    }
}
