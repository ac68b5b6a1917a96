//! Fleet description loaded from the `[simulation]` configuration table.

use obt_core::{DeviceId, OtmMethod};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Simulated fleet settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Delay before a device answers; 0 answers inside the issuing call
    pub latency_ms: u64,
    /// Seed for generated PINs; random when absent
    pub seed: Option<u64>,
    /// Devices on the simulated network
    pub devices: Vec<SimulatedDeviceConfig>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            latency_ms: 250,
            seed: None,
            devices: vec![
                SimulatedDeviceConfig::new("Smart Lamp"),
                SimulatedDeviceConfig {
                    supported_methods: vec![OtmMethod::RandomPin],
                    ..SimulatedDeviceConfig::new("Door Lock")
                },
                SimulatedDeviceConfig {
                    supported_methods: vec![OtmMethod::ManufacturerCertificate],
                    ..SimulatedDeviceConfig::new("Thermostat")
                },
            ],
        }
    }
}

impl SimulationConfig {
    /// Response latency
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

/// One `[[simulation.devices]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedDeviceConfig {
    /// Display name
    pub name: String,
    /// Fixed UUID; random when absent
    #[serde(default)]
    pub uuid: Option<DeviceId>,
    /// Start out owned
    #[serde(default)]
    pub owned: bool,
    /// Advertised transfer methods; empty advertises all of them
    #[serde(default)]
    pub supported_methods: Vec<OtmMethod>,
    /// Fail every ownership transfer
    #[serde(default)]
    pub fail_transfer: bool,
    /// Fail every provisioning request
    #[serde(default)]
    pub fail_provisioning: bool,
}

impl SimulatedDeviceConfig {
    /// Unowned device accepting every method
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: None,
            owned: false,
            supported_methods: Vec::new(),
            fail_transfer: false,
            fail_provisioning: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_table() {
        let config: SimulationConfig = toml::from_str(
            r#"
            latency_ms = 0

            [[devices]]
            name = "bench light"
            uuid = "12345678-1234-1234-1234-123456789abc"
            supported_methods = ["just_works", "random_pin"]

            [[devices]]
            name = "broken"
            owned = true
            fail_provisioning = true
            "#,
        )
        .expect("valid table");

        assert_eq!(config.latency_ms, 0);
        assert_eq!(config.devices.len(), 2);
        assert_eq!(
            config.devices[0].supported_methods,
            vec![OtmMethod::JustWorks, OtmMethod::RandomPin]
        );
        assert!(config.devices[0].uuid.is_some());
        assert!(config.devices[1].owned && config.devices[1].fail_provisioning);
    }

    #[test]
    fn missing_table_keys_fall_back_to_defaults() {
        let config: SimulationConfig = toml::from_str("seed = 7").expect("valid");
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.devices.len(), 3);
        assert_eq!(config.latency(), Duration::from_millis(250));
    }
}
