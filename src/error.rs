use std::fmt;
use std::ops::RangeInclusive;

use thiserror::Error;

use crate::ranges::{FirmwareRevision, ParameterKind};

#[derive(Error, Debug)]
pub enum DamError {
    #[error("Forbidden {kind} {value}, allowed {allowed}")]
    Validation {
        kind: ParameterKind,
        value: i64,
        allowed: Allowed,
    },

    #[error("Unknown {kind} {name:?}")]
    UnknownName { kind: ParameterKind, name: String },

    #[error("Invalid timeout {0} s")]
    InvalidTimeout(f64),

    #[error("{kind} is not supported by {revision} firmware")]
    Unsupported {
        kind: ParameterKind,
        revision: FirmwareRevision,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("No response within {0:?}")]
    Timeout(std::time::Duration),

    #[error("Unexpected response to {expected}: {received:?}")]
    MalformedResponse { expected: String, received: String },

    #[error("Device rejected {0}")]
    Rejected(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("Connection already closed")]
    ClosedConnection,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DamError {
    /// Short name of the failure class, as printed by the command line tool
    pub fn kind(&self) -> &'static str {
        match self {
            DamError::Validation { .. }
            | DamError::UnknownName { .. }
            | DamError::InvalidTimeout(_) => "ValidationError",
            DamError::Unsupported { .. } => "UnsupportedError",
            DamError::Connection(_) => "ConnectionError",
            DamError::Timeout(_) => "Timeout",
            DamError::MalformedResponse { .. } => "MalformedResponse",
            DamError::Rejected(_) => "RejectedCommand",
            DamError::Transfer(_) => "TransferError",
            DamError::ClosedConnection => "ClosedConnectionError",
            DamError::Io(_) => "IoError",
        }
    }
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Transfer aborted: {0}")]
    Aborted(String),

    #[error("uManager is not ready to accept data: {0}")]
    DeviceNotReady(String),

    #[error("Device accepted data but did not commit it: {0}")]
    CommitFailed(String),
}

/// Legal values for a validated parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allowed {
    pub range: RangeInclusive<i64>,
    pub sentinel: Option<i64>,
}

impl Allowed {
    pub fn contains(&self, value: i64) -> bool {
        self.range.contains(&value) || self.sentinel == Some(value)
    }
}

impl fmt::Display for Allowed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.range.start(), self.range.end())?;
        if let Some(sentinel) = self.sentinel {
            write!(f, " or {}", sentinel)?;
        }
        Ok(())
    }
}

pub type DamResult<T> = std::result::Result<T, DamError>;
