//! Pre-flight validation of settings before they reach a reader

use super::model::{
    AutoStartConfig, AutoStopConfig, GpoMode, ReaderCapabilities, RxSensitivity, Settings, TxPower,
};
use crate::error::ApplyError;
use std::ops::RangeInclusive;

pub const TX_POWER_DBM: RangeInclusive<f64> = 10.0..=30.5;
pub const RX_SENSITIVITY_DBM: RangeInclusive<f64> = -80.0..=-30.0;
pub const SEARCH_SESSION: RangeInclusive<u8> = 0..=3;
pub const GPI_DEBOUNCE_MS_MAX: u32 = 10_000;

/// Check every numeric field against its bound.
///
/// Needs nothing from the reader, so it runs before any transport call.
pub fn check_bounds(settings: &Settings) -> Result<(), ApplyError> {
    check_range(
        "session",
        settings.session as f64,
        *SEARCH_SESSION.start() as f64,
        *SEARCH_SESSION.end() as f64,
    )?;

    for antenna in &settings.antennas {
        if let TxPower::Dbm(dbm) = antenna.tx_power {
            check_range(
                &format!("antennas[{}].tx_power", antenna.port),
                dbm,
                *TX_POWER_DBM.start(),
                *TX_POWER_DBM.end(),
            )?;
        }
        if let RxSensitivity::Dbm(dbm) = antenna.rx_sensitivity {
            check_range(
                &format!("antennas[{}].rx_sensitivity", antenna.port),
                dbm,
                *RX_SENSITIVITY_DBM.start(),
                *RX_SENSITIVITY_DBM.end(),
            )?;
        }
    }

    for gpo in &settings.gpos {
        if let GpoMode::Pulsed { pulse_duration_ms } = gpo.mode {
            check_positive(&format!("gpos[{}].pulse_duration_ms", gpo.port), pulse_duration_ms)?;
        }
    }

    for gpi in &settings.gpis {
        check_range(
            &format!("gpis[{}].debounce_ms", gpi.port_number),
            gpi.debounce_ms as f64,
            0.0,
            GPI_DEBOUNCE_MS_MAX as f64,
        )?;
    }

    if let AutoStartConfig::Periodic { period_ms } = settings.auto_start {
        check_positive("auto_start.period_ms", period_ms)?;
    }
    if let AutoStopConfig::Duration { duration_ms } = settings.auto_stop {
        check_positive("auto_stop.duration_ms", duration_ms)?;
    }

    Ok(())
}

/// Check every port reference against the counts the reader reported
pub fn check_ports(settings: &Settings, caps: &ReaderCapabilities) -> Result<(), ApplyError> {
    for antenna in &settings.antennas {
        check_port("antennas", antenna.port, caps.antenna_count)?;
    }
    for gpo in &settings.gpos {
        check_port("gpos", gpo.port, caps.gpo_count)?;
    }
    for gpi in &settings.gpis {
        check_port("gpis", gpi.port_number, caps.gpi_count)?;
    }
    if let AutoStartConfig::GpiTrigger {
        gpi_port_number, ..
    } = settings.auto_start
    {
        check_port("auto_start.gpi_port_number", gpi_port_number, caps.gpi_count)?;
    }
    if let AutoStopConfig::GpiTrigger {
        gpi_port_number, ..
    } = settings.auto_stop
    {
        check_port("auto_stop.gpi_port_number", gpi_port_number, caps.gpi_count)?;
    }
    Ok(())
}

pub(crate) fn check_port(field: &str, index: u16, count: u16) -> Result<(), ApplyError> {
    if index == 0 || index > count {
        return Err(ApplyError::IndexOutOfRange {
            field: field.to_string(),
            index,
            count,
        });
    }
    Ok(())
}

fn check_range(field: &str, value: f64, min: f64, max: f64) -> Result<(), ApplyError> {
    // NaN fails `contains` too
    if !(min..=max).contains(&value) {
        return Err(ApplyError::OutOfRange {
            field: field.to_string(),
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn check_positive(field: &str, value: u32) -> Result<(), ApplyError> {
    check_range(field, value as f64, 1.0, u32::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::model::{GpiConfig, ReaderModel};

    fn r420() -> Settings {
        Settings::defaults_for(ReaderModel::R420)
    }

    #[test]
    fn test_defaults_are_valid() {
        for model in [ReaderModel::R220, ReaderModel::R420, ReaderModel::R700] {
            let settings = Settings::defaults_for(model);
            check_bounds(&settings).unwrap();
            check_ports(&settings, &model.capabilities()).unwrap();
        }
    }

    #[test]
    fn test_tx_power_bounds() {
        let mut settings = r420();
        settings.antenna_mut(1).unwrap().tx_power = TxPower::Dbm(30.5);
        assert!(check_bounds(&settings).is_ok());

        settings.antenna_mut(1).unwrap().tx_power = TxPower::Dbm(31.0);
        match check_bounds(&settings) {
            Err(ApplyError::OutOfRange { field, value, .. }) => {
                assert_eq!(field, "antennas[1].tx_power");
                assert_eq!(value, 31.0);
            },
            other => panic!("expected OutOfRange, got {:?}", other),
        }

        settings.antenna_mut(1).unwrap().tx_power = TxPower::Dbm(f64::NAN);
        assert!(check_bounds(&settings).is_err());
    }

    #[test]
    fn test_max_flag_skips_numeric_check() {
        let mut settings = r420();
        settings.antenna_mut(2).unwrap().rx_sensitivity = RxSensitivity::Max;
        settings.antenna_mut(2).unwrap().tx_power = TxPower::Max;
        assert!(check_bounds(&settings).is_ok());

        settings.antenna_mut(2).unwrap().rx_sensitivity = RxSensitivity::Dbm(-81.0);
        assert_eq!(check_bounds(&settings).unwrap_err().kind(), "out_of_range");
    }

    #[test]
    fn test_pulse_duration_must_be_positive() {
        let mut settings = r420();
        settings.set_gpo_mode(3, GpoMode::Pulsed { pulse_duration_ms: 0 });
        assert!(matches!(
            check_bounds(&settings),
            Err(ApplyError::OutOfRange { ref field, .. }) if field == "gpos[3].pulse_duration_ms"
        ));
    }

    #[test]
    fn test_gpi_debounce_and_session_bounds() {
        let mut settings = r420();
        settings.set_gpi(GpiConfig {
            port_number: 1,
            is_enabled: true,
            debounce_ms: GPI_DEBOUNCE_MS_MAX + 1,
        });
        assert!(check_bounds(&settings).is_err());

        let mut settings = r420();
        settings.session = 4;
        assert!(check_bounds(&settings).is_err());
    }

    #[test]
    fn test_ports_beyond_capabilities() {
        let caps = ReaderModel::R420.capabilities();
        let mut settings = r420();
        settings.set_gpo_mode(5, GpoMode::Normal);
        assert_eq!(
            check_ports(&settings, &caps),
            Err(ApplyError::IndexOutOfRange {
                field: "gpos".into(),
                index: 5,
                count: 4,
            })
        );
    }

    #[test]
    fn test_trigger_ports_checked() {
        let caps = ReaderModel::R700.capabilities();
        let mut settings = Settings::defaults_for(ReaderModel::R700);
        settings.auto_start = AutoStartConfig::GpiTrigger {
            gpi_port_number: 3,
            gpi_level: true,
        };
        assert!(matches!(
            check_ports(&settings, &caps),
            Err(ApplyError::IndexOutOfRange { index: 3, count: 2, .. })
        ));
    }
}
