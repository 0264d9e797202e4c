//! Error types for the Ward core library

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Storage not initialized - call StorageContext::initialize first")]
    StorageNotInitialized,

    #[error("Storage already initialized")]
    StorageAlreadyInitialized,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("PIN must be exactly {0} digits")]
    InvalidPinLength(usize),

    #[error("PIN must contain only digits")]
    InvalidPinFormat,

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Entries do not match")]
    SetupMismatch,

    #[error("Current credential is incorrect")]
    Unauthorized,

    #[error("No credential configured for {0}")]
    CredentialNotSet(String),

    #[error("Session timeout must be greater than zero")]
    InvalidSessionTimeout,

    #[error("No challenge in progress")]
    NoChallenge,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
