//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Serialization errors
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    // Cryptographic errors
    /// Symmetric encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// AEAD open failed: the ciphertext did not authenticate under the
    /// channel secret. The event carrying it must be dropped.
    #[error("authenticated decryption failed: {0}")]
    AuthDecrypt(String),

    /// RSA wrap/unwrap of channel credentials failed.
    #[error("credential wrap failed: {0}")]
    CredentialWrap(String),

    /// Invalid or malformed public key material.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// RSA key generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// The channel secret has not been derived yet.
    #[error("channel secret not available")]
    MissingSecret,

    // Envelope errors
    /// A received event violates the wire contract (for example a
    /// WEBRTC_SIGNALING event without a stream id). Logged and dropped.
    #[error("protocol violation: {0}")]
    Violation(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

// Conversions from underlying crate errors

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

impl From<rsa::Error> for ProtocolError {
    fn from(err: rsa::Error) -> Self {
        ProtocolError::CredentialWrap(err.to_string())
    }
}

impl From<base64::DecodeError> for ProtocolError {
    fn from(err: base64::DecodeError) -> Self {
        ProtocolError::Deserialization(format!("invalid base64: {}", err))
    }
}
