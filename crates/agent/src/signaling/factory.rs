//! The peer-connection abstraction the router drives.

use protocol::signaling::IceCandidate;
use thiserror::Error;

use crate::transport::BoxFuture;

/// Failure reported by a peer-connection backend.
#[derive(Debug, Clone, Error)]
#[error("peer connection failed: {0}")]
pub struct PeerConnectionError(pub String);

/// Backend that owns the actual peer connections.
///
/// Implementations wrap a native WebRTC stack (or a test double). The
/// router hands them raw SDP and candidate strings and never inspects
/// the contents. Connection-state callbacks flow back through
/// [`crate::signaling::SignalingRouter::peer_connected`] and
/// [`crate::signaling::SignalingRouter::peer_failed`], wired up by the
/// embedding host.
pub trait PeerConnectionFactory: Send + Sync {
    /// Creates the local peer connection for an inbound offer and
    /// returns the answer SDP.
    fn create_answer_for_offer(
        &self,
        stream_id: &str,
        remote_agent: &str,
        offer_sdp: &str,
    ) -> BoxFuture<'_, Result<String, PeerConnectionError>>;

    /// Creates the local peer connection as offerer and returns the
    /// offer SDP.
    fn create_offer_for_stream(
        &self,
        stream_id: &str,
        remote_agent: &str,
    ) -> BoxFuture<'_, Result<String, PeerConnectionError>>;

    /// Applies the remote answer on a stream we offered.
    fn handle_remote_answer(
        &self,
        stream_id: &str,
        answer_sdp: &str,
    ) -> BoxFuture<'_, Result<(), PeerConnectionError>>;

    /// Adds a relayed ICE candidate to an existing peer connection.
    fn add_ice_candidate(
        &self,
        stream_id: &str,
        candidate: IceCandidate,
    ) -> BoxFuture<'_, Result<(), PeerConnectionError>>;

    /// Tears down the peer connection for a stream.
    fn close_peer_connection(&self, stream_id: &str) -> BoxFuture<'_, ()>;
}

/// Factory for hosts without a WebRTC stack: every negotiation fails.
///
/// Lets the agent run messaging and the password handshake while
/// signaling events addressed to it produce `Failed` stream events
/// instead of silent drops.
pub struct UnsupportedPeerConnectionFactory;

impl PeerConnectionFactory for UnsupportedPeerConnectionFactory {
    fn create_answer_for_offer(
        &self,
        _stream_id: &str,
        _remote_agent: &str,
        _offer_sdp: &str,
    ) -> BoxFuture<'_, Result<String, PeerConnectionError>> {
        Box::pin(async {
            Err(PeerConnectionError(
                "no peer connection factory configured".to_string(),
            ))
        })
    }

    fn create_offer_for_stream(
        &self,
        _stream_id: &str,
        _remote_agent: &str,
    ) -> BoxFuture<'_, Result<String, PeerConnectionError>> {
        Box::pin(async {
            Err(PeerConnectionError(
                "no peer connection factory configured".to_string(),
            ))
        })
    }

    fn handle_remote_answer(
        &self,
        _stream_id: &str,
        _answer_sdp: &str,
    ) -> BoxFuture<'_, Result<(), PeerConnectionError>> {
        Box::pin(async {
            Err(PeerConnectionError(
                "no peer connection factory configured".to_string(),
            ))
        })
    }

    fn add_ice_candidate(
        &self,
        _stream_id: &str,
        _candidate: IceCandidate,
    ) -> BoxFuture<'_, Result<(), PeerConnectionError>> {
        Box::pin(async {
            Err(PeerConnectionError(
                "no peer connection factory configured".to_string(),
            ))
        })
    }

    fn close_peer_connection(&self, _stream_id: &str) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}
