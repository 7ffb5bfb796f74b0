use thiserror::Error;

use crate::settings::AuthMethod;
use crate::verifier::RecoveryState;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Record store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("Vault error: {0}")]
    Vault(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Corrupt record {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    #[error("Secret rejected: {0}")]
    InvalidSecret(String),

    #[error("Auth method {0} does not take a secret")]
    UnsupportedMethod(AuthMethod),

    #[error("Recovery flow is in state {actual:?}, expected {expected:?}")]
    RecoveryStep {
        expected: RecoveryState,
        actual: RecoveryState,
    },

    #[error("No recovery flow in progress")]
    RecoveryNotStarted,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Lock session for {0} is already closed")]
    SessionClosed(String),
}

pub type Result<T> = std::result::Result<T, LockError>;
