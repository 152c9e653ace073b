//! # RelayMesh Agent Library
//!
//! This crate provides the client-side agent runtime for RelayMesh
//! channels: processes join named shared channels on a remote broker
//! and exchange ordered durable events, ephemeral real-time events,
//! and WebRTC signaling, with confidentiality enforced end-to-end by a
//! channel-derived secret the broker never sees.
//!
//! ## Overview
//!
//! - **Connection Manager**: connect/resume/disconnect lifecycle,
//!   session persistence, host election
//! - **Receive Pipeline**: dual-offset batch pulls with auto-routing
//!   of protocol traffic and an ephemeral-first dispatch order
//! - **Password Handshake**: RSA-wrapped in-band credential hand-off
//!   for agents joining with only a channel id
//! - **Signaling Router**: per-stream offer/answer/ICE demux onto a
//!   pluggable peer-connection backend, glare-free by host election
//! - **Transports**: HTTP long-poll control path plus an optional UDP
//!   datagram bridge
//! - **Control Surface**: line-delimited JSON endpoint for embedding
//!   hosts
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       ChannelAgent                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌────────────┐  ┌────────────────┐  ┌───────────────────┐  │
//! │  │  Session   │  │    Password    │  │    Signaling      │  │
//! │  │  + Store   │  │    Exchange    │  │    Router         │  │
//! │  └────────────┘  └────────────────┘  └───────────────────┘  │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │                  Receive Pipeline                      │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │                                                              │
//! │  ┌───────────────────┐  ┌─────────────────────────────────┐  │
//! │  │  HTTP Transport   │  │        UDP Bridge               │  │
//! │  └───────────────────┘  └─────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agent::{ChannelAgent, ConnectConfig};
//! use agent::transport::{HttpTransport, HttpTransportConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = Arc::new(HttpTransport::new(HttpTransportConfig::new(
//!         "https://broker.relaymesh.dev",
//!     ))?);
//!     let agent = ChannelAgent::new(transport);
//!
//!     agent
//!         .connect(ConnectConfig::new("alice").with_channel("room-1", "pw"))
//!         .await?;
//!     agent.send_message("*", "hello channel", true).await?;
//!     agent.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: connect configuration and the sidecar config file
//! - [`manager`]: the connection manager facade
//! - [`receive`]: receive pipeline, worker, and handler traits
//! - [`handshake`]: the in-band password handshake
//! - [`signaling`]: stream state machine and peer-connection seam
//! - [`session`]: session state and persistence
//! - [`transport`]: broker transports (HTTP, UDP bridge)
//! - [`control`]: the line-delimited JSON control surface
//! - [`error`]: error types

pub mod config;
pub mod control;
pub mod error;
pub mod handshake;
pub mod manager;
pub mod receive;
pub mod session;
pub mod signaling;
pub mod transport;

mod outbox;
#[cfg(test)]
mod testing;

// Re-export protocol for convenience
pub use protocol;

// Re-export the commonly used types at the crate root
pub use config::{AgentConfig, ConfigError, ConnectConfig};
pub use error::{AgentError, Result};
pub use handshake::PasswordRequestPolicy;
pub use manager::{ChannelAgent, SessionSummary};
pub use receive::{EventHandler, StartAt};
pub use session::{FileSessionStore, Session, SessionStore};
pub use signaling::{
    PeerConnectionError, PeerConnectionFactory, SignalingRouter, StreamEvent, StreamRole,
    StreamState, UnsupportedPeerConnectionFactory,
};
pub use transport::{
    HttpTransport, HttpTransportConfig, Transport, TransportError, UdpBridge, UdpBridgeConfig,
};
