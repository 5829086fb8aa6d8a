//! # Error Types
//!
//! Error handling for the RPC runtime.
//!
//! This module defines all error variants that can occur during protocol
//! operations, from low-level I/O failures to handshake and authorization
//! problems.
//!
//! ## Error Categories
//! - **I/O / Transport Errors**: connect, send and receive failures — recoverable
//!   via the reconnection controller
//! - **Protocol Errors**: malformed or unexpected messages — connection-fatal
//! - **Authorization Errors**: bad or missing token — connection-fatal, never
//!   auto-retried by the core
//! - **Serialization Errors**: bad payloads — request-scoped, the connection survives
//! - **Service Invocation Errors**: faults raised by the bound service — caught and
//!   converted to an error response, the connection survives
//!
//! All errors implement `std::error::Error` for interoperability.

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common error cases.
pub mod constants {
    /// Correlation map errors
    pub const ERR_PENDING_LOCK: &str = "Failed to acquire lock on pending-request map";
    pub const ERR_CALLBACK_LOCK: &str = "Failed to acquire lock on callback table";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_NOT_CONNECTED: &str = "Client is not connected";

    /// Handshake errors
    pub const ERR_HANDSHAKE_REPLAYED: &str = "Initialization received on an initialized connection";
    pub const ERR_BAD_PUBLIC_KEY: &str = "Client public key has invalid length";
    pub const ERR_SESSION_NOT_ESTABLISHED: &str = "Symmetric session keys not installed";
    pub const ERR_HANDSHAKE_NOT_COMPLETE: &str = "Handshake not complete";

    /// Request processing errors
    pub const ERR_UNKNOWN_METHOD: &str = "No operation registered under this name";
    pub const ERR_NO_MATCHING_OVERLOAD: &str =
        "No registered operation matches the supplied parameters";
    pub const ERR_NOT_AUTHORIZED: &str = "Connection is not authorized";

    /// Cryptographic errors
    pub const ERR_ENCRYPTION_FAILED: &str = "Encryption failed";
    pub const ERR_DECRYPTION_FAILED: &str = "Decryption failed";
    pub const ERR_SEALED_BOX_TOO_SHORT: &str = "Sealed payload shorter than ephemeral key";
}

/// RpcError is the primary error type for all runtime operations.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Operation timed out")]
    Timeout,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Serialize error: {0}")]
    Serialize(String),

    #[error("Deserialize error: {0}")]
    Deserialize(String),

    #[error("Service invocation failed: {0}")]
    ServiceInvocation(String),

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RpcError {
    /// Whether the reconnection controller may recover from this error.
    /// Authorization and protocol violations are deliberately not retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RpcError::Io(_)
                | RpcError::Transport(_)
                | RpcError::ConnectionClosed
                | RpcError::Timeout
        )
    }
}

/// Type alias for Results using RpcError
pub type Result<T> = std::result::Result<T, RpcError>;
