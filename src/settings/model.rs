//! Reader settings model
//!
//! Typed representation of everything a fixed reader can be configured with.
//! Power and sensitivity use tagged unions so "use the device maximum" and
//! "use this explicit value" cannot both be set at once.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported reader families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReaderModel {
    R220,
    R420,
    R700,
}

impl ReaderModel {
    /// Port counts as shipped from the factory
    pub fn capabilities(self) -> ReaderCapabilities {
        let (antenna_count, gpo_count, gpi_count) = match self {
            ReaderModel::R220 => (2, 4, 4),
            ReaderModel::R420 => (4, 4, 4),
            ReaderModel::R700 => (4, 3, 2),
        };
        ReaderCapabilities {
            model: self,
            antenna_count,
            gpo_count,
            gpi_count,
        }
    }

    /// Only R7xx readers implement the Impinj Authenticate command
    pub fn supports_authenticate(self) -> bool {
        matches!(self, ReaderModel::R700)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReaderModel::R220 => "R220",
            ReaderModel::R420 => "R420",
            ReaderModel::R700 => "R700",
        }
    }
}

impl fmt::Display for ReaderModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Port counts discovered from a reader's settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderCapabilities {
    pub model: ReaderModel,
    pub antenna_count: u16,
    pub gpo_count: u16,
    pub gpi_count: u16,
}

impl ReaderCapabilities {
    /// Derive capabilities from a settings object as reported by the reader
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            model: settings.model,
            antenna_count: settings.antennas.len() as u16,
            gpo_count: settings.gpos.len() as u16,
            gpi_count: settings.gpis.len() as u16,
        }
    }
}

/// Transmit power
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxPower {
    /// Device maximum
    Max,
    Dbm(f64),
}

/// Receive sensitivity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RxSensitivity {
    /// Device maximum (most sensitive)
    Max,
    Dbm(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntennaConfig {
    /// 1-based antenna port
    pub port: u16,
    pub is_enabled: bool,
    pub tx_power: TxPower,
    pub rx_sensitivity: RxSensitivity,
}

impl AntennaConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            is_enabled: true,
            tx_power: TxPower::Max,
            rx_sensitivity: RxSensitivity::Max,
        }
    }
}

/// What drives a general-purpose output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GpoMode {
    /// Driven only by explicit `set_gpo` calls
    Normal,
    /// Goes high for `pulse_duration_ms` whenever it is set
    Pulsed { pulse_duration_ms: u32 },
    ReaderOperationalStatus,
    LlrpConnectionStatus,
    ReaderInventoryStatus,
    NetworkConnectionStatus,
    /// High while tags are being singulated
    ReaderInventoryTagsStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpoConfig {
    /// 1-based output port
    pub port: u16,
    #[serde(flatten)]
    pub mode: GpoMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpiConfig {
    /// 1-based input port
    pub port_number: u16,
    pub is_enabled: bool,
    pub debounce_ms: u32,
}

impl GpiConfig {
    pub fn new(port_number: u16) -> Self {
        Self {
            port_number,
            is_enabled: false,
            debounce_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AutoStartConfig {
    #[default]
    None,
    Immediate,
    Periodic { period_ms: u32 },
    GpiTrigger { gpi_port_number: u16, gpi_level: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AutoStopConfig {
    #[default]
    None,
    Duration { duration_ms: u32 },
    GpiTrigger {
        gpi_port_number: u16,
        gpi_level: bool,
        timeout_ms: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportMode {
    /// One report per tag as soon as it is seen
    #[default]
    Individual,
    /// Reports are held until inventory stops
    BatchAfterStop,
}

/// Which optional fields the reader attaches to tag reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportConfig {
    pub mode: ReportMode,
    pub include_antenna_port: bool,
    pub include_peak_rssi: bool,
    pub include_first_seen_time: bool,
    /// FastId: TID is appended to every EPC read
    pub include_tid: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            mode: ReportMode::Individual,
            include_antenna_port: true,
            include_peak_rssi: false,
            include_first_seen_time: false,
            include_tid: false,
        }
    }
}

/// Complete reader configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub model: ReaderModel,
    /// Gen2 search session (0-3)
    pub session: u8,
    pub antennas: Vec<AntennaConfig>,
    pub gpis: Vec<GpiConfig>,
    pub gpos: Vec<GpoConfig>,
    pub auto_start: AutoStartConfig,
    pub auto_stop: AutoStopConfig,
    pub report: ReportConfig,
}

impl Settings {
    /// Factory defaults for a reader model
    pub fn defaults_for(model: ReaderModel) -> Self {
        let caps = model.capabilities();
        Self {
            model,
            session: 2,
            antennas: (1..=caps.antenna_count).map(AntennaConfig::new).collect(),
            gpis: (1..=caps.gpi_count).map(GpiConfig::new).collect(),
            gpos: (1..=caps.gpo_count)
                .map(|port| GpoConfig {
                    port,
                    mode: GpoMode::Normal,
                })
                .collect(),
            auto_start: AutoStartConfig::None,
            auto_stop: AutoStopConfig::None,
            report: ReportConfig::default(),
        }
    }

    pub fn antenna(&self, port: u16) -> Option<&AntennaConfig> {
        self.antennas.iter().find(|a| a.port == port)
    }

    pub fn antenna_mut(&mut self, port: u16) -> Option<&mut AntennaConfig> {
        self.antennas.iter_mut().find(|a| a.port == port)
    }

    pub fn enabled_antennas(&self) -> impl Iterator<Item = &AntennaConfig> {
        self.antennas.iter().filter(|a| a.is_enabled)
    }

    pub fn gpo(&self, port: u16) -> Option<&GpoConfig> {
        self.gpos.iter().find(|g| g.port == port)
    }

    /// Set the mode of an output, adding an entry for ports not yet present.
    ///
    /// Ports are not checked here; `apply` rejects ports the reader lacks.
    pub fn set_gpo_mode(&mut self, port: u16, mode: GpoMode) -> &mut Self {
        match self.gpos.iter_mut().find(|g| g.port == port) {
            Some(gpo) => gpo.mode = mode,
            None => {
                self.gpos.push(GpoConfig { port, mode });
                self.gpos.sort_by_key(|g| g.port);
            },
        }
        self
    }

    pub fn gpi(&self, port_number: u16) -> Option<&GpiConfig> {
        self.gpis.iter().find(|g| g.port_number == port_number)
    }

    /// Replace or insert the configuration of one input
    pub fn set_gpi(&mut self, gpi: GpiConfig) -> &mut Self {
        match self
            .gpis
            .iter_mut()
            .find(|g| g.port_number == gpi.port_number)
        {
            Some(existing) => *existing = gpi,
            None => {
                self.gpis.push(gpi);
                self.gpis.sort_by_key(|g| g.port_number);
            },
        }
        self
    }
}
