//! Reader settings: typed model, validation, persistence and synchronization

pub mod model;
pub mod persistence;
pub mod sync;
pub mod validate;

pub use model::{
    AntennaConfig, AutoStartConfig, AutoStopConfig, GpiConfig, GpoConfig, GpoMode,
    ReaderCapabilities, ReaderModel, ReportConfig, ReportMode, RxSensitivity, Settings, TxPower,
};
pub use persistence::{load, persist, SettingsFile};
pub use sync::{apply, apply_default, query_current, query_default, set_gpo};
