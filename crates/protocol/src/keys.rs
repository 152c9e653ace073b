//! Per-session RSA keys and the credential hand-off payloads.
//!
//! A joining agent that knows only an opaque channel id cannot derive
//! the channel secret. It generates an ephemeral RSA key pair, attaches
//! the public half (PEM) to a broadcast PASSWORD_REQUEST, and an
//! existing member replies with the `(channelName, channelPassword)`
//! pair wrapped to that key. The wrapped blob is end-to-end encrypted
//! to the requester, so the reply travels with the channel-layer
//! `encrypted` flag cleared.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ProtocolError, Result};

/// RSA modulus size for session key pairs.
pub const KEY_BITS: usize = 2048;

/// The channel credentials exchanged by the password handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelCredentials {
    pub channel_name: String,
    pub channel_password: String,
}

/// Content of a PASSWORD_REQUEST event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordRequestPayload {
    /// PEM-encoded (PKCS#8) RSA public key of the requester.
    pub public_key_pem: String,
}

/// An ephemeral RSA key pair created for one agent session.
#[derive(Clone)]
pub struct AgentKeyPair {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl AgentKeyPair {
    /// Generates a fresh 2048-bit key pair.
    pub fn generate() -> Result<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, KEY_BITS)
            .map_err(|e| ProtocolError::KeyGeneration(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Returns the public half as PKCS#8 PEM, suitable for embedding in
    /// a PASSWORD_REQUEST payload.
    pub fn public_key_pem(&self) -> Result<String> {
        self.public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| ProtocolError::InvalidPublicKey(e.to_string()))
    }

    /// Unwraps a PASSWORD_REPLY blob addressed to this key pair.
    pub fn unwrap_credentials(&self, wrapped: &str) -> Result<ChannelCredentials> {
        let ciphertext = BASE64.decode(wrapped)?;
        let plaintext = self
            .private_key
            .decrypt(Pkcs1v15Encrypt, &ciphertext)
            .map_err(|e| ProtocolError::CredentialWrap(format!("RSA decrypt failed: {}", e)))?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// A short fingerprint of the public key for log lines.
    pub fn fingerprint(&self) -> String {
        match self.public_key.to_public_key_der() {
            Ok(der) => key_fingerprint(der.as_bytes()),
            Err(_) => "<invalid-key>".to_string(),
        }
    }
}

impl std::fmt::Debug for AgentKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentKeyPair")
            .field("fingerprint", &self.fingerprint())
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Wraps channel credentials to a requester's public key.
///
/// The PEM comes straight off the wire from an untrusted peer; a
/// malformed key fails with [`ProtocolError::InvalidPublicKey`].
pub fn wrap_credentials(public_key_pem: &str, credentials: &ChannelCredentials) -> Result<String> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| ProtocolError::InvalidPublicKey(e.to_string()))?;
    let plaintext = serde_json::to_vec(credentials)?;
    let ciphertext = public_key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, &plaintext)
        .map_err(|e| ProtocolError::CredentialWrap(format!("RSA encrypt failed: {}", e)))?;
    Ok(BASE64.encode(ciphertext))
}

/// Formats a key fingerprint as colon-separated hex pairs over the
/// first 8 bytes of the SHA-256 digest.
pub fn key_fingerprint(der: &[u8]) -> String {
    let hash = Sha256::digest(der);
    hash[..8]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}
