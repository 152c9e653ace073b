//! WebRTC signaling routing.
//!
//! The router demultiplexes WEBRTC_SIGNALING events per stream id onto
//! a [`PeerConnectionFactory`] implementation supplied by the
//! embedding host. The core never parses SDP or candidate strings; it
//! owns the per-stream state machine, the glare rule (only the host
//! side offers), and buffering of early ICE candidates.

pub mod factory;
pub mod router;

pub use factory::{PeerConnectionError, PeerConnectionFactory, UnsupportedPeerConnectionFactory};
pub use router::{
    SignalingRouter, StreamEvent, StreamRole, StreamSession, StreamState, MAX_PENDING_CANDIDATES,
};
