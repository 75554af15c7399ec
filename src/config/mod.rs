//! Configuration management for the RFID gateway
//!
//! Handles loading, validating and saving the YAML configuration file. The
//! file names where reader settings are persisted and describes the
//! simulated readers the console programs connect to.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;
use tracing::warn;

use crate::settings::ReaderModel;
use crate::tags::TagData;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// Reader session behaviour
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReaderConfig {
    /// Where `save` writes the active settings
    #[serde(default = "default_settings_file")]
    pub settings_file: String,
    /// Re-apply the saved settings file right after connecting
    #[serde(default = "default_true")]
    pub apply_saved_settings: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            settings_file: default_settings_file(),
            apply_saved_settings: true,
        }
    }
}

/// Readers served by the in-process simulator
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SimulatorConfig {
    #[serde(default)]
    pub readers: Vec<SimulatedReaderConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SimulatedReaderConfig {
    /// Hostname or IP the reader answers on
    pub address: String,
    #[serde(default = "default_model")]
    pub model: ReaderModel,
    /// False emulates a reader that refuses new clients
    #[serde(default = "default_true")]
    pub accept_clients: bool,
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
    #[serde(default)]
    pub tags: Vec<SimulatedTagConfig>,
}

/// A tag in a simulated reader's field
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SimulatedTagConfig {
    pub epc: TagData,
    #[serde(default)]
    pub tid: TagData,
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !fs::try_exists(path).await.unwrap_or(false) {
            warn!(
                "Config file {} not found, using defaults (no simulated readers)",
                path.display()
            );
            return Ok(Self::default());
        }
        Self::load(path).await
    }

    /// Save configuration to file
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.reader.settings_file.trim().is_empty() {
            anyhow::bail!("reader.settings_file cannot be empty");
        }

        let mut addresses = HashSet::new();
        for (idx, reader) in self.simulator.readers.iter().enumerate() {
            if reader.address.trim().is_empty() {
                anyhow::bail!("Simulated reader {} address cannot be empty", idx);
            }
            if !addresses.insert(reader.address.as_str()) {
                anyhow::bail!("Simulated reader address '{}' is listed twice", reader.address);
            }
            if reader.report_interval_ms == 0 {
                anyhow::bail!(
                    "Simulated reader '{}' report_interval_ms must be greater than 0",
                    reader.address
                );
            }
            for (tag_idx, tag) in reader.tags.iter().enumerate() {
                if tag.epc.is_empty() {
                    anyhow::bail!(
                        "Simulated reader '{}' tag {} has an empty EPC",
                        reader.address,
                        tag_idx
                    );
                }
            }
        }

        Ok(())
    }
}

fn default_settings_file() -> String { "settings.json".to_string() }
fn default_true() -> bool { true }
fn default_model() -> ReaderModel { ReaderModel::R420 }
fn default_report_interval_ms() -> u64 { crate::transport::simulator::DEFAULT_REPORT_INTERVAL_MS }
