//! # RelayMesh Protocol Library
//!
//! This crate provides the wire types and cryptographic primitives for
//! the RelayMesh channel agent.
//!
//! ## Overview
//!
//! The protocol crate is the foundation of the agent's communication
//! layer, providing:
//!
//! - **Event Envelope**: the single message shape carried through a
//!   channel (chat, custom payloads, the password handshake, WebRTC
//!   signaling, presence)
//! - **Broker Contract**: handshake, receive, send, disconnect and
//!   active-agent request/response shapes, plus the dual-offset cursor
//! - **Channel Secret**: PBKDF2 derivation from `(channelName,
//!   channelPassword)` and ChaCha20-Poly1305 sealing of event payloads
//! - **Credential Hand-off**: ephemeral RSA key pairs and the wrapped
//!   payloads of the in-band password handshake
//! - **Signaling Payloads**: the offer/answer/ICE envelope routed per
//!   stream id
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Event Envelope               │  JSON, camelCase
//! ├─────────────────────────────────────────┤
//! │        Channel Sealing (optional)       │  ChaCha20-Poly1305
//! ├─────────────────────────────────────────┤
//! │           Broker Contract               │  handshake / pull / send
//! ├─────────────────────────────────────────┤
//! │     Transport (HTTP long-poll / UDP)    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::secret::{derive_channel_secret, event_aad};
//! use protocol::event::EventType;
//!
//! // Every member derives the same secret; the broker never sees it.
//! let secret = derive_channel_secret("room-1", "pw");
//!
//! let aad = event_aad(EventType::ChatText, "alice", "*");
//! let sealed = secret.seal(b"hello channel", &aad).unwrap();
//! let opened = secret.open(&sealed, &aad).unwrap();
//! assert_eq!(opened, b"hello channel");
//! ```
//!
//! ## Modules
//!
//! - [`event`]: event envelope and batch results
//! - [`wire`]: broker request/response shapes and cursors
//! - [`secret`]: channel-secret derivation and AEAD sealing
//! - [`keys`]: RSA session keys and credential wrapping
//! - [`signaling`]: WebRTC signaling payloads
//! - [`error`]: error types

pub mod error;
pub mod event;
pub mod keys;
pub mod secret;
pub mod signaling;
pub mod wire;

// Re-export the most commonly used types at the crate root
pub use error::{ProtocolError, Result};
pub use event::{AgentInfo, Capability, EventMessage, EventMessageResult, EventType, BROADCAST};
pub use keys::{AgentKeyPair, ChannelCredentials, PasswordRequestPayload};
pub use secret::{derive_channel_secret, event_aad, ChannelSecret};
pub use signaling::{IceCandidate, SignalKind, SignalingPayload};
pub use wire::{
    Ack, ActiveAgentsResponse, AgentsRequest, ApiKeyScope, ChannelState, DatagramPull,
    DatagramPush, DisconnectRequest, HandshakeRequest, HandshakeResponse, ReceiveConfig,
    ReceiveRequest, SendRequest, DEFAULT_RECEIVE_LIMIT,
};
