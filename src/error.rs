//! Error types for wirelink.

use thiserror::Error;

use crate::session::RegistryError;

/// Main error type for all wirelink operations.
#[derive(Debug, Error)]
pub enum WirelinkError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (oversized frame, corrupted length prefix, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Name resolution succeeded but produced no usable address.
    #[error("No addresses resolved for {0}")]
    Unresolved(String),

    /// The connection is not open.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No tokio runtime was available to spawn I/O tasks on.
    #[error("No reactor available: {0}")]
    NoReactor(#[from] tokio::runtime::TryCurrentError),

    /// Session registry used out of lifecycle order.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Result type alias using WirelinkError.
pub type Result<T> = std::result::Result<T, WirelinkError>;
