// src/error.rs
use ethers::types::{Address, U256};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowError {
    #[error("Timestamp {0} does not fit in 48 bits")]
    Overflow(u64),

    #[error("validAfter {valid_after} is not before validUntil {valid_until}")]
    Inverted { valid_after: u64, valid_until: u64 },
}

/// Reasons a paymaster payload is malformed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Payload of {len} bytes is shorter than offset {offset}")]
    OffsetOutOfBounds { offset: usize, len: usize },

    #[error("Expected {expected} bytes of paymaster data, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid validity window: {0}")]
    InvalidWindow(#[from] WindowError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Caller {caller:?} is not the owner")]
    Unauthorized { caller: Address },

    #[error("Config is already initialized")]
    AlreadyInitialized,

    #[error("Config is not initialized")]
    Uninitialized,

    #[error("Max allowed cost {0} must be non-zero and at most the ceiling")]
    InvalidMaxCost(U256),

    #[error("Zero address is not a valid {0}")]
    InvalidAddress(&'static str),

    #[error("Failed to read config: {0}")]
    Io(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

#[derive(Error, Debug)]
pub enum SignerError {
    /// The signing backend could not be reached; the request may be retried.
    #[error("Signing backend unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Cannot build validity window: {0}")]
    InvalidWindow(#[from] WindowError),

    #[error("System clock error: {0}")]
    Clock(String),

    #[error("Signature recovers to {recovered:?}, expected {expected:?}")]
    SelfCheckFailed { expected: Address, recovered: Address },
}

impl SignerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SignerError::Unavailable(_))
    }
}
