//! Settings persistence to JSON files
//!
//! Saves a settings object so it can be re-applied after the reader or the
//! application restarts.

use super::model::Settings;
use crate::error::PersistError;
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// On-disk envelope around a settings object
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct SettingsFile {
    /// Version of the file format
    pub version: String,
    /// When the file was written
    pub saved_at: DateTime<Utc>,
    pub settings: Settings,
}

impl SettingsFile {
    /// Current file format version
    pub const VERSION: &'static str = "1.0.0";

    pub fn new(settings: Settings) -> Self {
        Self {
            version: Self::VERSION.to_string(),
            saved_at: Utc::now(),
            settings,
        }
    }

    /// Files written by any 1.x release are readable
    fn is_supported(version: &str) -> bool {
        version.split('.').next() == Some("1")
    }
}

/// Write settings to `path` as pretty JSON
pub async fn persist(settings: &Settings, path: impl AsRef<Path>) -> Result<(), PersistError> {
    let path = path.as_ref();
    let file = SettingsFile::new(settings.clone());
    let json = serde_json::to_string_pretty(&file).map_err(|source| PersistError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    fs::write(path, json).await.map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("Settings saved to: {}", path.display());
    Ok(())
}

/// Read settings previously written by [`persist`]
pub async fn load(path: impl AsRef<Path>) -> Result<Settings, PersistError> {
    let path = path.as_ref();
    let json = fs::read_to_string(path)
        .await
        .map_err(|source| PersistError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let file: SettingsFile = serde_json::from_str(&json).map_err(|source| PersistError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if !SettingsFile::is_supported(&file.version) {
        return Err(PersistError::UnsupportedVersion {
            path: path.to_path_buf(),
            version: file.version,
        });
    }

    debug!(
        "Settings loaded (version: {}, saved at: {})",
        file.version, file.saved_at
    );
    Ok(file.settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::model::{
        AntennaConfig, AutoStartConfig, AutoStopConfig, GpiConfig, GpoConfig, GpoMode,
        ReaderModel, ReportConfig, ReportMode, RxSensitivity, TxPower,
    };
    use proptest::prelude::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_save_load_defaults() {
        let settings = Settings::defaults_for(ReaderModel::R420);
        let temp_file = NamedTempFile::new().unwrap();

        persist(&settings, temp_file.path()).await.unwrap();
        let loaded = load(temp_file.path()).await.unwrap();
        assert_eq!(loaded, settings);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(dir.path().join("absent.json")).await.unwrap_err();
        assert_eq!(err.kind(), "io");
    }

    #[tokio::test]
    async fn test_garbage_is_parse_error() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "<settings/>").unwrap();
        let err = load(temp_file.path()).await.unwrap_err();
        assert_eq!(err.kind(), "parse");
    }

    #[tokio::test]
    async fn test_future_major_version_rejected() {
        let temp_file = NamedTempFile::new().unwrap();
        let mut file = SettingsFile::new(Settings::defaults_for(ReaderModel::R700));
        file.version = "2.0.0".to_string();
        std::fs::write(temp_file.path(), serde_json::to_string(&file).unwrap()).unwrap();

        let err = load(temp_file.path()).await.unwrap_err();
        assert!(matches!(err, PersistError::UnsupportedVersion { ref version, .. } if version == "2.0.0"));
    }

    // Readers step power and sensitivity in quarter dBm
    fn quarter_dbm(min: f64, max: f64) -> impl Strategy<Value = f64> {
        let steps = ((max - min) * 4.0) as i32;
        (0..=steps).prop_map(move |s| min + s as f64 / 4.0)
    }

    fn antenna_strategy() -> impl Strategy<Value = AntennaConfig> {
        (
            1u16..=4,
            any::<bool>(),
            prop_oneof![Just(TxPower::Max), quarter_dbm(10.0, 30.5).prop_map(TxPower::Dbm)],
            prop_oneof![
                Just(RxSensitivity::Max),
                quarter_dbm(-80.0, -30.0).prop_map(RxSensitivity::Dbm)
            ],
        )
            .prop_map(|(port, is_enabled, tx_power, rx_sensitivity)| AntennaConfig {
                port,
                is_enabled,
                tx_power,
                rx_sensitivity,
            })
    }

    fn gpo_mode_strategy() -> impl Strategy<Value = GpoMode> {
        prop_oneof![
            Just(GpoMode::Normal),
            (1u32..=60_000).prop_map(|pulse_duration_ms| GpoMode::Pulsed { pulse_duration_ms }),
            Just(GpoMode::ReaderOperationalStatus),
            Just(GpoMode::LlrpConnectionStatus),
            Just(GpoMode::ReaderInventoryStatus),
            Just(GpoMode::NetworkConnectionStatus),
            Just(GpoMode::ReaderInventoryTagsStatus),
        ]
    }

    fn settings_strategy() -> impl Strategy<Value = Settings> {
        (
            prop_oneof![
                Just(ReaderModel::R220),
                Just(ReaderModel::R420),
                Just(ReaderModel::R700)
            ],
            0u8..=3,
            prop::collection::vec(antenna_strategy(), 0..4),
            prop::collection::vec((1u16..=4, any::<bool>(), 0u32..=10_000), 0..4),
            prop::collection::vec((1u16..=4, gpo_mode_strategy()), 0..4),
            prop_oneof![
                Just(AutoStartConfig::None),
                Just(AutoStartConfig::Immediate),
                (1u32..=100_000).prop_map(|period_ms| AutoStartConfig::Periodic { period_ms }),
                (1u16..=4, any::<bool>()).prop_map(|(gpi_port_number, gpi_level)| {
                    AutoStartConfig::GpiTrigger {
                        gpi_port_number,
                        gpi_level,
                    }
                }),
            ],
            prop_oneof![
                Just(AutoStopConfig::None),
                (1u32..=100_000).prop_map(|duration_ms| AutoStopConfig::Duration { duration_ms }),
                (1u16..=4, any::<bool>(), 0u32..=100_000).prop_map(
                    |(gpi_port_number, gpi_level, timeout_ms)| AutoStopConfig::GpiTrigger {
                        gpi_port_number,
                        gpi_level,
                        timeout_ms,
                    }
                ),
            ],
            (
                prop_oneof![Just(ReportMode::Individual), Just(ReportMode::BatchAfterStop)],
                any::<[bool; 4]>(),
            ),
        )
            .prop_map(
                |(model, session, antennas, gpis, gpos, auto_start, auto_stop, (mode, flags))| {
                    Settings {
                        model,
                        session,
                        antennas,
                        gpis: gpis
                            .into_iter()
                            .map(|(port_number, is_enabled, debounce_ms)| GpiConfig {
                                port_number,
                                is_enabled,
                                debounce_ms,
                            })
                            .collect(),
                        gpos: gpos
                            .into_iter()
                            .map(|(port, mode)| GpoConfig { port, mode })
                            .collect(),
                        auto_start,
                        auto_stop,
                        report: ReportConfig {
                            mode,
                            include_antenna_port: flags[0],
                            include_peak_rssi: flags[1],
                            include_first_seen_time: flags[2],
                            include_tid: flags[3],
                        },
                    }
                },
            )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_persist_then_load_is_identity(settings in settings_strategy()) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let temp_file = NamedTempFile::new().unwrap();

            let loaded = rt.block_on(async {
                persist(&settings, temp_file.path()).await.unwrap();
                load(temp_file.path()).await.unwrap()
            });
            prop_assert_eq!(loaded, settings);
        }
    }
}
