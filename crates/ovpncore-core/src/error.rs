//! Shared error types

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors shared across the protocol core that are not specific to
/// crypto or wire-protocol parsing.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid VPN address
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Cryptographic error
    #[error("crypto error: {0}")]
    CryptoError(#[from] ovpncore_crypto::CryptoError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}
