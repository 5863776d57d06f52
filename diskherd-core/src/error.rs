use std::time::Duration;

use thiserror::Error;

use crate::types::TransferPhase;

#[derive(Error, Debug)]
pub enum HerdError {
    #[error("{kind} '{name}' not found")]
    ReferenceNotFound { kind: RefKind, name: String },

    #[error("Engine rejected {operation}: {message}")]
    RemoteOperation { operation: String, message: String },

    #[error("Network error during {operation}: {cause}")]
    Network { operation: String, cause: String },

    #[error("Upload chunk {range} failed with HTTP {status}")]
    TransferChunk { status: u16, range: String },

    #[error("Image transfer ended in phase {phase}")]
    TransferFailed { phase: TransferPhase },

    #[error("Timed out after {timeout:?} waiting for {operation}")]
    TimeoutExceeded { operation: String, timeout: Duration },

    #[error("Invalid size '{0}': expected bytes or an IEC unit such as 10GiB")]
    InvalidSize(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, HerdError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Vm,
    Disk,
    StorageDomain,
}

impl std::fmt::Display for RefKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefKind::Vm => write!(f, "VM"),
            RefKind::Disk => write!(f, "disk"),
            RefKind::StorageDomain => write!(f, "storage domain"),
        }
    }
}
