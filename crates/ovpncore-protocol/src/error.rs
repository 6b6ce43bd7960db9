//! Protocol error types

use thiserror::Error;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Invalid packet format
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    /// Unknown opcode
    #[error("unknown opcode: {0}")]
    UnknownOpcode(u8),

    /// Packet too short
    #[error("packet too short: expected at least {expected}, got {got}")]
    PacketTooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        got: usize,
    },

    /// Invalid session ID
    #[error("invalid session ID")]
    InvalidSessionId,

    /// Session not found
    #[error("session not found")]
    SessionNotFound,

    /// Handshake failed
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// TLS error
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Replay attack detected
    #[error("replay attack detected")]
    ReplayDetected,

    /// Key not available
    #[error("key not available for key_id {0}")]
    KeyNotAvailable(u8),

    /// Cryptographic error
    #[error("crypto error: {0}")]
    CryptoError(#[from] ovpncore_crypto::CryptoError),

    /// Core error
    #[error("core error: {0}")]
    CoreError(#[from] ovpncore_core::CoreError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Timeout
    #[error("operation timed out")]
    Timeout,

    /// Connection reset
    #[error("connection reset by peer")]
    ConnectionReset,

    /// Encrypt was requested but no PRIMARY key slot exists yet.
    #[error("not ready: no primary key slot")]
    NotReady,

    /// Session-id on a control packet didn't match the session's stored
    /// peer session-id. Fatal per the data-model invariant.
    #[error("session-id mismatch")]
    SessionIdMismatch,

    /// A pushed option matched the deny list.
    #[error("pushed option rejected: {0}")]
    PushedOptionRejected(String),

    /// A control-channel fragment or pushed-option assembly exceeded a
    /// configured maximum size.
    #[error("size limit exceeded: {0}")]
    SizeLimitExceeded(String),

    /// A per-slot retransmit budget was exhausted without an ACK.
    #[error("excess retry: retransmit budget exhausted")]
    ExcessRetry,

    /// The control-channel send window is full; caller must wait for ACKs.
    #[error("send window full")]
    WindowFull,
}
