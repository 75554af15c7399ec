//! RFID GW - session, settings and tag-operation core for Impinj fixed readers
//!
//! Connects to R220/R420/R700 readers through a [`transport::Connector`],
//! keeps reader settings in sync, fans asynchronous reader events out to
//! subscribers and runs tag operation sequences.

pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod ops;
pub mod reader;
pub mod settings;
pub mod tags;
pub mod transport;

pub use error::{ApplyError, ConnectError, Error, PersistError, Result, StateError, SubmitError};
pub use events::{EventKind, ReaderEvent, SubscriptionId};
pub use reader::{ConnectionManager, ReaderSession, ReaderState};
