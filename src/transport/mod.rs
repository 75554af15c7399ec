//! Reader transport boundary
//!
//! The core never speaks the reader's native protocol itself. A `Connector`
//! opens a `Transport` for an address and hands back the push channel the
//! transport uses for tag reports, op completions and start/stop notices.
//!
//! Note: All `Transport` methods take `&self` so the session can share one
//! `Arc<dyn Transport>` between the caller and the delivery task.
//! Implementations use interior mutability for their state.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{ConnectError, TransportError};
use crate::ops::{RawOpResult, SequenceId, SubmittedSequence};
use crate::settings::Settings;
use crate::tags::TagReport;

pub mod simulator;

pub use simulator::{SimulatedConnector, SimulatedReader, TransportCall};

/// Which settings to read back from the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsSource {
    /// What the reader is running with now
    Current,
    /// Factory defaults for the model
    Default,
}

/// Asynchronous notifications pushed by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    TagsReported(TagReport),
    TagOpComplete(Vec<RawOpResult>),
    ReaderStarted,
    ReaderStopped,
}

/// Open transport plus its event stream
pub struct TransportLink {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens transports by address
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, address: &str) -> Result<TransportLink, ConnectError>;
}

/// Request/acknowledge interface to one connected reader
#[async_trait]
pub trait Transport: Send + Sync {
    /// Reader address this transport is bound to
    fn address(&self) -> &str;

    /// Begin inventory
    async fn start(&self) -> Result<(), TransportError>;

    /// End inventory
    async fn stop(&self) -> Result<(), TransportError>;

    /// Close the connection; the event channel is closed afterwards
    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn query_settings(&self, source: SettingsSource) -> Result<Settings, TransportError>;

    /// Replace the reader configuration as a whole
    async fn apply_settings(&self, settings: &Settings) -> Result<(), TransportError>;

    async fn submit_op_sequence(&self, sequence: &SubmittedSequence)
        -> Result<(), TransportError>;

    async fn delete_op_sequence(&self, id: SequenceId) -> Result<(), TransportError>;

    /// Drive one general-purpose output high or low
    async fn set_gpo(&self, port: u16, state: bool) -> Result<(), TransportError>;
}
