//! Operator configuration
//!
//! Read from a TOML file (`.obt/config.toml` unless `--config` says
//! otherwise). A missing file means defaults. `OBT_STORAGE_DIR` and
//! `OBT_LOG_LEVEL` override the file.

use anyhow::{bail, Context, Result};
use obt_core::DiscoveryScope;
use obt_simulator::SimulationConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Default credential storage directory
pub const DEFAULT_STORAGE_DIR: &str = "./onboarding_tool_creds";

/// Default upper bound on application payload size, in bytes
pub const DEFAULT_MAX_APP_DATA_SIZE: usize = 16384;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Onboarding tool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Where the secure-storage collaborator keeps credentials
    pub storage_dir: PathBuf,
    /// Largest application payload the transport accepts
    pub max_app_data_size: usize,
    /// Log level used without `--verbose` or `RUST_LOG`
    pub log_level: String,
    /// Scope of the plain discovery menu entries
    pub default_scope: DiscoveryScope,
    /// Simulated device fleet
    pub simulation: SimulationConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            max_app_data_size: DEFAULT_MAX_APP_DATA_SIZE,
            log_level: "info".to_string(),
            default_scope: DiscoveryScope::Global,
            simulation: SimulationConfig::default(),
        }
    }
}

impl CliConfig {
    /// Load from `path`, apply environment overrides and validate
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse `path`, or return defaults if it does not exist
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply `OBT_*` overrides from `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("OBT_STORAGE_DIR").filter(|v| !v.trim().is_empty()) {
            self.storage_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup("OBT_LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
            self.log_level = level.trim().to_lowercase();
        }
    }

    /// Reject settings the tool cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_app_data_size == 0 {
            bail!("max_app_data_size must be greater than zero");
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            bail!(
                "log_level must be one of {}, got {:?}",
                LOG_LEVELS.join(", "),
                self.log_level
            );
        }
        let mut seen = HashSet::new();
        for device in &self.simulation.devices {
            if let Some(id) = device.uuid {
                if !seen.insert(id) {
                    bail!("simulated device {} reuses UUID {id}", device.name);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = CliConfig::from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, CliConfig::default());
        assert_eq!(config.storage_dir, PathBuf::from("./onboarding_tool_creds"));
        assert_eq!(config.max_app_data_size, 16384);
    }

    #[test]
    fn file_values_are_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            storage_dir = "/var/lib/obt"
            default_scope = "site-local-ipv6"

            [simulation]
            latency_ms = 0

            [[simulation.devices]]
            name = "bench"
            "#,
        )
        .unwrap();

        let config = CliConfig::from_file(&path).unwrap();
        assert_eq!(config.storage_dir, PathBuf::from("/var/lib/obt"));
        assert_eq!(config.default_scope, DiscoveryScope::SiteLocalIpv6);
        assert_eq!(config.simulation.latency_ms, 0);
        assert_eq!(config.simulation.devices.len(), 1);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_app_data_size = \"big\"").unwrap();
        assert!(CliConfig::from_file(&path).is_err());
    }

    #[test]
    fn environment_overrides_file() {
        let env: HashMap<&str, &str> =
            HashMap::from([("OBT_STORAGE_DIR", "/tmp/creds"), ("OBT_LOG_LEVEL", "DEBUG")]);
        let mut config = CliConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/creds"));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn validation_rejects_bad_settings() {
        let mut config = CliConfig {
            max_app_data_size: 0,
            ..CliConfig::default()
        };
        assert!(config.validate().is_err());

        config.max_app_data_size = 1024;
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        config.log_level = "warn".to_string();
        let id = "12345678-1234-1234-1234-123456789abc".parse().unwrap();
        for device in &mut config.simulation.devices {
            device.uuid = Some(id);
        }
        assert!(config.validate().is_err());
    }
}
