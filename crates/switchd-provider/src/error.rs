//! Provider error types.

use thiserror::Error;

/// Error type for forwarding-plane operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// No switch instance with this name.
    #[error("no such switch instance: {0}")]
    NoSuchSwitch(String),

    /// A switch instance with this name already exists.
    #[error("switch instance already exists: {0}")]
    SwitchExists(String),

    /// The datapath type is not supported by this provider.
    #[error("unsupported datapath type: {0}")]
    UnsupportedType(String),

    /// No port with this number or key on the instance.
    #[error("no such port: {0}")]
    NoSuchPort(String),

    /// The device name is reserved and cannot be opened.
    #[error("device name is reserved: {0}")]
    ReservedName(String),

    /// No device with this name.
    #[error("no such device: {0}")]
    NoSuchDevice(String),

    /// No programmed entry for this key.
    #[error("entry not found: {0}")]
    NotFound(String),

    /// The operation was rejected by the forwarding plane.
    #[error("{op} rejected: {reason}")]
    Rejected { op: String, reason: String },

    /// A hardware table or resource pool is exhausted.
    #[error("out of resources: {0}")]
    ResourceExhausted(String),
}

impl ProviderError {
    /// Creates a rejection error.
    pub fn rejected(op: impl Into<String>, reason: impl Into<String>) -> Self {
        ProviderError::Rejected {
            op: op.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;
