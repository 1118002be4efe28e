//! Error types for DeChat
//!
//! This module contains the error taxonomy used throughout the messaging core:
//! session errors, synchronous validation errors, storage and transfer errors
//! raised while composing, chain outcome errors that surface on envelopes, and
//! the `DechatError` type that unifies them all.

use crate::types::Amount;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Wallet session errors. Fatal to in-flight compose calls, never to the process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("No active wallet session")]
    NoActiveSession,
    #[error("Wallet session invalidated: {reason}")]
    SessionInvalidated { reason: String },
    #[error("Wallet provider unavailable: {reason}")]
    ProviderUnavailable { reason: String },
    #[error("Wallet connection request denied by user")]
    UserDenied,
    #[error("Wallet is on chain {actual}, expected chain {expected}")]
    WrongChain { expected: u64, actual: u64 },
    #[error("Wallet connection timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

/// Input rejected synchronously; never retried automatically
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid recipient address: {reason}")]
    InvalidRecipient { reason: String },
    #[error("Recipient must differ from sender")]
    SelfAddressed,
    #[error("Message text is empty")]
    EmptyText,
    #[error("Message text exceeds maximum length of {max} characters (got {actual})")]
    TextTooLong { max: usize, actual: usize },
    #[error("Message text rejected: {reason}")]
    InvalidContent { reason: String },
    #[error("Image payload is empty")]
    EmptyPayload,
    #[error("Invalid amount: {reason}")]
    InvalidAmount { reason: String },
}

/// Content storage errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("Storage upload timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

impl StorageError {
    /// `Unavailable` and `Timeout` may be retried by the caller with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Unavailable { .. } | StorageError::Timeout { .. })
    }
}

/// Value transfer errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Amount, available: Amount },
    #[error("Invalid transfer recipient: {reason}")]
    InvalidRecipient { reason: String },
    #[error("Transfer rejected by user")]
    UserRejected,
    #[error("Chain collaborator unavailable: {reason}")]
    ChainUnavailable { reason: String },
    #[error("Unknown transfer {transfer_id}")]
    UnknownTransfer { transfer_id: String },
    #[error("Cannot cancel transfer in state {state}")]
    CancellationRejected { state: String },
    #[error("Illegal chain state transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },
    #[error("Transfer not included after {duration_ms}ms")]
    InclusionTimeout { duration_ms: u64 },
}

impl TransferError {
    /// Only waits on the chain are retryable; user-facing rejections must be re-initiated
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::InclusionTimeout { .. } | TransferError::ChainUnavailable { .. }
        )
    }
}

/// Terminal on-chain outcomes, surfaced on the envelope as `Failed`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainOutcomeError {
    #[error("transfer reverted")]
    Reverted { tx_reference: Option<String> },
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

/// Core error type for DeChat
#[derive(Debug, thiserror::Error)]
pub enum DechatError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Chain outcome: {0}")]
    ChainOutcome(#[from] ChainOutcomeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// History snapshot could not be used
    #[error("Persistence error: {reason}")]
    Persistence { reason: String },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// Engine event channel closed or full
    #[error("Channel error: {message}")]
    Channel { message: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl DechatError {
    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        DechatError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a persistence error with a reason
    pub fn persistence_error<T: Into<String>>(reason: T) -> Self {
        DechatError::Persistence {
            reason: reason.into(),
        }
    }

    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        DechatError::Channel {
            message: message.into(),
        }
    }

    /// Create a session invalidated error
    pub fn session_invalidated<T: Into<String>>(reason: T) -> Self {
        DechatError::Connection(ConnectionError::SessionInvalidated {
            reason: reason.into(),
        })
    }

    /// Create an invalid recipient error
    pub fn invalid_recipient<T: Into<String>>(reason: T) -> Self {
        DechatError::Validation(ValidationError::InvalidRecipient {
            reason: reason.into(),
        })
    }

    /// Whether the caller may retry the failed operation with backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            DechatError::Storage(err) => err.is_retryable(),
            DechatError::Transfer(err) => err.is_retryable(),
            DechatError::Channel { .. } => true,
            _ => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, DechatError>;
pub type DechatResult<T> = Result<T>;
