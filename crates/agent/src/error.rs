//! Error types for the agent crate.

use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;
use protocol::ProtocolError;

/// Agent error type covering the caller-facing failure modes.
///
/// Failures inside the background receive worker are never surfaced
/// through this type; the worker logs, drops the offending event, and
/// continues.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The connect configuration is missing required fields. Raised at
    /// connect entry, never after.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A connect was attempted while a session is live.
    #[error("already connected")]
    AlreadyConnected,

    /// The broker did not return a session id.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The operation requires a live session.
    #[error("not connected")]
    NotConnected,

    /// A single request failed at the network layer. Recoverable by
    /// retrying; cursors do not advance.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A cryptographic or wire-contract failure bubbled up from the
    /// protocol layer.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A signaling stream could not be established. The same failure
    /// is also emitted to the stream event handler.
    #[error("stream error: {0}")]
    Stream(String),
}

/// Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;
