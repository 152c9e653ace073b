//! Transport abstraction for the broker control path.
//!
//! The agent consumes two logical endpoints: a request-response control
//! path (handshake, disconnect, send, long-poll receive, active
//! agents) and an optional datagram bridge for the low-latency path.
//! The control path is modeled by the [`Transport`] trait so different
//! implementations (HTTP, mock for testing) can back the same agent.

pub mod http;
pub mod udp;

use std::future::Future;
use std::pin::Pin;

use protocol::event::{AgentInfo, EventMessageResult};
use protocol::wire::{HandshakeRequest, HandshakeResponse, ReceiveConfig, SendRequest};
use thiserror::Error;

pub use http::{HttpTransport, HttpTransportConfig};
pub use udp::{UdpBridge, UdpBridgeConfig};

/// Boxed future type used by the object-safe transport traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Failures of a single transport request.
///
/// A transport error never implies event loss: the cursor only
/// advances on successful pulls, so the caller retries from the same
/// position.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be completed (connection refused, reset,
    /// malformed response, ...).
    #[error("request failed: {0}")]
    Request(String),

    /// The per-operation deadline elapsed.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The broker answered with a non-success status.
    #[error("broker rejected request: status {status}")]
    Rejected {
        /// HTTP-style status code.
        status: u16,
    },

    /// A request or response body could not be encoded or decoded.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// The endpoint needed for this operation is not configured.
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Encoding(err.to_string())
    }
}

/// Result type alias for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// The broker control path.
///
/// All methods after `handshake` carry the opaque session id issued by
/// the broker. Implementations must preserve the broker-assigned order
/// of durable events on the receive path.
pub trait Transport: Send + Sync {
    /// Opens a session on the broker.
    fn handshake(
        &self,
        request: HandshakeRequest,
    ) -> BoxFuture<'_, TransportResult<HandshakeResponse>>;

    /// Closes a session server-side. Returns whether the broker
    /// acknowledged.
    fn disconnect(&self, session_id: &str) -> BoxFuture<'_, TransportResult<bool>>;

    /// Submits an outbound event.
    fn send(&self, request: SendRequest) -> BoxFuture<'_, TransportResult<()>>;

    /// Pulls the next batch at the given cursor. Long-polls when the
    /// broker supports it.
    fn receive(
        &self,
        session_id: &str,
        cursor: ReceiveConfig,
    ) -> BoxFuture<'_, TransportResult<EventMessageResult>>;

    /// Lists the channel's currently active agents.
    fn active_agents(&self, session_id: &str) -> BoxFuture<'_, TransportResult<Vec<AgentInfo>>>;
}
