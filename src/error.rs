//! Error taxonomy for reader sessions, settings and tag operations
//!
//! Every error has a human-readable `Display` and a stable snake_case
//! `kind()` so console front-ends can print `kind: message` and scripts can
//! match on the kind without parsing prose.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to establish a reader session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("reader at '{address}' is unreachable: {reason}")]
    Unreachable { address: String, reason: String },

    #[error("reader at '{address}' refused the client: {reason}")]
    AuthFailure { address: String, reason: String },
}

impl ConnectError {
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectError::Unreachable { .. } => "unreachable",
            ConnectError::AuthFailure { .. } => "auth_failure",
        }
    }
}

/// Session state violations and transport failures on lifecycle calls.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("invalid transition from {from} while {attempted}")]
    InvalidTransition {
        from: &'static str,
        attempted: &'static str,
    },

    #[error("reader session is not connected")]
    NotConnected,

    #[error("reader session was disconnected while the call was pending")]
    Disconnected,

    #[error("transport error: {0}")]
    Transport(String),
}

impl StateError {
    pub fn kind(&self) -> &'static str {
        match self {
            StateError::InvalidTransition { .. } => "invalid_transition",
            StateError::NotConnected => "not_connected",
            StateError::Disconnected => "disconnected",
            StateError::Transport(_) => "transport",
        }
    }
}

/// Rejection of a settings object by validation or by the reader.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ApplyError {
    #[error("{field} = {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{field} refers to port {index} but the reader only has {count}")]
    IndexOutOfRange {
        field: String,
        index: u16,
        count: u16,
    },

    #[error("reader rejected settings: {0}")]
    Rejected(String),

    #[error(transparent)]
    State(#[from] StateError),
}

impl ApplyError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApplyError::OutOfRange { .. } => "out_of_range",
            ApplyError::IndexOutOfRange { .. } => "index_out_of_range",
            ApplyError::Rejected(_) => "rejected",
            ApplyError::State(e) => e.kind(),
        }
    }
}

/// Rejection of a tag operation sequence.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("op #{op_index} ({op}) is missing required field '{field}'")]
    MissingRequiredField {
        op_index: usize,
        op: &'static str,
        field: &'static str,
    },

    #[error("op #{op_index} ({op}) has invalid '{field}': {reason}")]
    InvalidField {
        op_index: usize,
        op: &'static str,
        field: &'static str,
        reason: String,
    },

    #[error("target tag filter is invalid: {0}")]
    InvalidTarget(String),

    #[error("op sequence contains no operations")]
    EmptySequence,

    #[error("reader rejected op sequence: {0}")]
    Rejected(String),

    #[error(transparent)]
    State(#[from] StateError),
}

impl SubmitError {
    pub fn kind(&self) -> &'static str {
        match self {
            SubmitError::MissingRequiredField { .. } => "missing_required_field",
            SubmitError::InvalidField { .. } => "invalid_field",
            SubmitError::InvalidTarget(_) => "invalid_target",
            SubmitError::EmptySequence => "empty_sequence",
            SubmitError::Rejected(_) => "rejected",
            SubmitError::State(e) => e.kind(),
        }
    }
}

/// Settings file read/write failures.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to access settings file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("settings file {} has unsupported version {version}", path.display())]
    UnsupportedVersion { path: PathBuf, version: String },
}

impl PersistError {
    pub fn kind(&self) -> &'static str {
        match self {
            PersistError::Io { .. } => "io",
            PersistError::Parse { .. } => "parse",
            PersistError::UnsupportedVersion { .. } => "unsupported_version",
        }
    }
}

/// Failure reported by a transport implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("reader rejected request: {0}")]
    Rejected(String),

    #[error("transport closed")]
    Closed,

    #[error("transport I/O failure: {0}")]
    Io(String),
}

impl From<TransportError> for StateError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Closed => StateError::Disconnected,
            other => StateError::Transport(other.to_string()),
        }
    }
}

impl From<TransportError> for ApplyError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Rejected(msg) => ApplyError::Rejected(msg),
            other => ApplyError::State(other.into()),
        }
    }
}

impl From<TransportError> for SubmitError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Rejected(msg) => SubmitError::Rejected(msg),
            other => SubmitError::State(other.into()),
        }
    }
}

/// Umbrella error for front-ends that drive the whole stack.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("configuration error: {0:#}")]
    Config(anyhow::Error),
}

impl Error {
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Connect(e) => e.kind(),
            Error::State(e) => e.kind(),
            Error::Apply(e) => e.kind(),
            Error::Submit(e) => e.kind(),
            Error::Persist(e) => e.kind(),
            Error::Config(_) => "config",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_transport_maps_to_disconnected() {
        let err: StateError = TransportError::Closed.into();
        assert_eq!(err, StateError::Disconnected);

        let err: ApplyError = TransportError::Closed.into();
        assert_eq!(err.kind(), "disconnected");
    }

    #[test]
    fn test_rejection_keeps_reader_message() {
        let err: SubmitError = TransportError::Rejected("too many op specs".into()).into();
        assert_eq!(err, SubmitError::Rejected("too many op specs".into()));
        assert_eq!(err.kind(), "rejected");
    }

    #[test]
    fn test_umbrella_kind_delegates() {
        let err = Error::from(ConnectError::Unreachable {
            address: "10.0.0.1".into(),
            reason: "no reader".into(),
        });
        assert_eq!(err.kind(), "unreachable");
        assert!(err.to_string().contains("10.0.0.1"));
    }
}
