//! Channel-secret derivation and the event sealing scheme.
//!
//! Every channel member derives the same 256-bit secret from
//! `(channelName, channelPassword)`; the broker never sees either input
//! or the derived key. Event payloads marked `encrypted` carry
//! `base64(nonce ‖ ciphertext)` produced by ChaCha20-Poly1305 with the
//! event's routing fields bound in as associated data, so a relayed
//! event cannot be re-addressed without failing authentication.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::error::{ProtocolError, Result};
use crate::event::EventType;

/// Length of the derived channel secret in bytes.
pub const SECRET_LENGTH: usize = 32;

/// AEAD nonce length in bytes.
const NONCE_LENGTH: usize = 12;

/// Fixed application salt for secret derivation.
///
/// The derivation must be reproducible by every member given only the
/// channel name and password, so the salt is a protocol constant rather
/// than per-channel random data.
const DERIVATION_SALT: &[u8] = b"relaymesh/channel-secret/v1";

/// PBKDF2 iteration count.
const DERIVATION_ROUNDS: u32 = 100_000;

/// The symmetric secret shared by all members of a channel.
#[derive(Clone, PartialEq, Eq)]
pub struct ChannelSecret([u8; SECRET_LENGTH]);

impl ChannelSecret {
    /// Creates a secret from raw bytes. Intended for tests and for
    /// stores that persist derived material; normal callers use
    /// [`derive_channel_secret`].
    pub fn from_bytes(bytes: [u8; SECRET_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Returns the raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; SECRET_LENGTH] {
        &self.0
    }

    /// Seals a plaintext payload under this secret.
    ///
    /// Returns the opaque wire form: base64 over a fresh 12-byte nonce
    /// followed by the ciphertext (which includes the Poly1305 tag).
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<String> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| ProtocolError::Encryption("AEAD seal failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    /// Opens a sealed payload, verifying the tag and associated data.
    ///
    /// Fails with [`ProtocolError::AuthDecrypt`] when the ciphertext was
    /// produced under a different secret, was tampered with, or was
    /// re-addressed (aad mismatch).
    pub fn open(&self, sealed: &str, aad: &[u8]) -> Result<Vec<u8>> {
        let raw = BASE64
            .decode(sealed)
            .map_err(|e| ProtocolError::AuthDecrypt(format!("invalid base64: {}", e)))?;
        if raw.len() < NONCE_LENGTH {
            return Err(ProtocolError::AuthDecrypt(format!(
                "sealed payload too short: {} bytes",
                raw.len()
            )));
        }

        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LENGTH);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.0));

        cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| ProtocolError::AuthDecrypt("authentication failed".to_string()))
    }
}

impl std::fmt::Debug for ChannelSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ChannelSecret").field(&"[REDACTED]").finish()
    }
}

/// Derives the channel secret from the channel name and password.
///
/// PBKDF2-HMAC-SHA256 over `channelName ‖ "|" ‖ channelPassword` with a
/// fixed application salt. Deterministic: every member derives the same
/// key, and the broker never participates.
pub fn derive_channel_secret(channel_name: &str, channel_password: &str) -> ChannelSecret {
    let input = format!("{}|{}", channel_name, channel_password);
    let mut key = [0u8; SECRET_LENGTH];
    pbkdf2_hmac::<Sha256>(input.as_bytes(), DERIVATION_SALT, DERIVATION_ROUNDS, &mut key);
    ChannelSecret(key)
}

/// Builds the associated data binding an event's routing fields.
///
/// `type ‖ from ‖ to`, pipe-separated. The broker-assigned `id` and
/// `date` are excluded since they do not exist at seal time.
pub fn event_aad(event_type: EventType, from: &str, to: &str) -> Vec<u8> {
    format!("{}|{}|{}", event_type.wire_name(), from, to).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let a = derive_channel_secret("room-1", "pw");
        let b = derive_channel_secret("room-1", "pw");
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_derivation_distinguishes_inputs() {
        let a = derive_channel_secret("room-1", "pw");
        let b = derive_channel_secret("room-1", "pw2");
        let c = derive_channel_secret("room-2", "pw");
        assert_ne!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
        assert_ne!(b.as_bytes(), c.as_bytes());
    }

    #[test]
    fn test_derivation_separator_is_significant() {
        // ("ab", "c") and ("a", "bc") must not collide
        let a = derive_channel_secret("ab", "c");
        let b = derive_channel_secret("a", "bc");
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let secret = derive_channel_secret("room-1", "pw");
        let aad = event_aad(EventType::ChatText, "alice", "*");

        let sealed = secret.seal(b"hello channel", &aad).unwrap();
        let opened = secret.open(&sealed, &aad).unwrap();
        assert_eq!(opened, b"hello channel");
    }

    #[test]
    fn test_seal_produces_fresh_nonces() {
        let secret = derive_channel_secret("room-1", "pw");
        let aad = event_aad(EventType::ChatText, "alice", "*");

        let first = secret.seal(b"same plaintext", &aad).unwrap();
        let second = secret.seal(b"same plaintext", &aad).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_open_with_wrong_secret_fails() {
        let secret = derive_channel_secret("room-1", "pw");
        let other = derive_channel_secret("room-1", "wrong");
        let aad = event_aad(EventType::ChatText, "alice", "*");

        let sealed = secret.seal(b"hello", &aad).unwrap();
        let result = other.open(&sealed, &aad);
        assert!(matches!(result, Err(ProtocolError::AuthDecrypt(_))));
    }

    #[test]
    fn test_open_with_mismatched_aad_fails() {
        let secret = derive_channel_secret("room-1", "pw");
        let aad = event_aad(EventType::ChatText, "alice", "bob");
        let readdressed = event_aad(EventType::ChatText, "alice", "carol");

        let sealed = secret.seal(b"for bob only", &aad).unwrap();
        let result = secret.open(&sealed, &readdressed);
        assert!(matches!(result, Err(ProtocolError::AuthDecrypt(_))));
    }

    #[test]
    fn test_open_tampered_ciphertext_fails() {
        let secret = derive_channel_secret("room-1", "pw");
        let aad = event_aad(EventType::ChatText, "alice", "*");

        let sealed = secret.seal(b"hello", &aad).unwrap();
        let mut raw = BASE64.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let tampered = BASE64.encode(raw);

        let result = secret.open(&tampered, &aad);
        assert!(matches!(result, Err(ProtocolError::AuthDecrypt(_))));
    }

    #[test]
    fn test_open_garbage_fails() {
        let secret = derive_channel_secret("room-1", "pw");
        let aad = event_aad(EventType::ChatText, "alice", "*");

        assert!(secret.open("not base64 at all!!!", &aad).is_err());
        // valid base64 but shorter than a nonce
        assert!(secret.open(&BASE64.encode([1u8, 2, 3]), &aad).is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let secret = derive_channel_secret("room-1", "pw");
        let debug = format!("{:?}", secret);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("pw"));
    }

    #[test]
    fn test_aad_binds_routing_fields() {
        let a = event_aad(EventType::ChatText, "alice", "bob");
        let b = event_aad(EventType::Custom, "alice", "bob");
        let c = event_aad(EventType::ChatText, "bob", "alice");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, b"CHAT_TEXT|alice|bob".to_vec());
    }
}
