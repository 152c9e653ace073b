//! Per-stream signaling state machine and demultiplexer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use protocol::signaling::{IceCandidate, SignalKind, SignalingPayload};
use protocol::EventType;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::factory::PeerConnectionFactory;
use crate::error::{AgentError, Result};
use crate::outbox::Outbox;

/// Upper bound on buffered early ICE candidates per stream; the oldest
/// candidate is dropped when the buffer is full.
pub const MAX_PENDING_CANDIDATES: usize = 32;

/// Which side of the negotiation this agent is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    Offerer,
    Answerer,
}

/// Negotiation state of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    New,
    Offered,
    Answered,
    Connected,
    Failed,
    Closed,
}

/// Tracked state for one signaling stream.
#[derive(Debug, Clone)]
pub struct StreamSession {
    pub stream_id: String,
    pub remote_agent: String,
    pub role: StreamRole,
    pub state: StreamState,
    pending_candidates: VecDeque<IceCandidate>,
}

impl StreamSession {
    fn new(stream_id: String, remote_agent: String, role: StreamRole) -> Self {
        Self {
            stream_id,
            remote_agent,
            role,
            state: StreamState::New,
            pending_candidates: VecDeque::new(),
        }
    }

    /// Buffers an ICE candidate that arrived before the stream was
    /// negotiated. Drop-oldest when full.
    fn buffer_candidate(&mut self, candidate: IceCandidate) {
        if self.pending_candidates.len() >= MAX_PENDING_CANDIDATES {
            self.pending_candidates.pop_front();
            tracing::warn!(stream_id = %self.stream_id, "pending candidate buffer full, dropped oldest");
        }
        self.pending_candidates.push_back(candidate);
    }

    fn drain_pending(&mut self) -> VecDeque<IceCandidate> {
        std::mem::take(&mut self.pending_candidates)
    }

    /// Number of buffered early candidates.
    pub fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.len()
    }
}

/// Stream lifecycle notifications delivered to the user handler.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The peer connection reached the connected state.
    Connected {
        stream_id: String,
        remote_agent: String,
    },
    /// Negotiation or the peer connection failed; the stream entry has
    /// been removed.
    Failed {
        stream_id: String,
        remote_agent: String,
        reason: String,
    },
    /// The stream was closed locally or by teardown.
    Closed { stream_id: String },
}

/// Routes offer/answer/ICE envelopes between the channel and the
/// peer-connection backend.
///
/// All mutations of the stream table happen on the receive worker (or
/// the caller of `open_stream`), so state transitions are applied in
/// receive order per stream.
pub struct SignalingRouter {
    streams: DashMap<String, StreamSession>,
    factory: Arc<dyn PeerConnectionFactory>,
    outbox: Outbox,
    event_tx: mpsc::Sender<StreamEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<StreamEvent>>>,
}

impl SignalingRouter {
    pub(crate) fn new(factory: Arc<dyn PeerConnectionFactory>, outbox: Outbox) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            streams: DashMap::new(),
            factory,
            outbox,
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    /// Returns the stream event receiver. Can be taken once.
    pub fn events(&self) -> Option<mpsc::Receiver<StreamEvent>> {
        self.event_rx.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Snapshot of a stream's state, if tracked.
    pub fn stream(&self, stream_id: &str) -> Option<StreamSession> {
        self.streams.get(stream_id).map(|entry| entry.clone())
    }

    /// Whether any stream exists with the given remote agent.
    pub fn has_stream_with(&self, remote_agent: &str) -> bool {
        self.streams
            .iter()
            .any(|entry| entry.remote_agent == remote_agent)
    }

    /// Opens a stream toward `remote_agent`.
    ///
    /// Only the host side (`initiate == true`) creates and sends the
    /// OFFER; the other side records nothing and waits for the offer
    /// to arrive, which prevents glare from simultaneous offers.
    pub async fn open_stream(
        &self,
        stream_id: &str,
        remote_agent: &str,
        initiate: bool,
    ) -> Result<()> {
        if self.streams.contains_key(stream_id) {
            return Ok(());
        }
        if !initiate {
            tracing::debug!(stream_id, remote_agent, "not host, waiting for offer");
            return Ok(());
        }

        self.streams.insert(
            stream_id.to_string(),
            StreamSession::new(
                stream_id.to_string(),
                remote_agent.to_string(),
                StreamRole::Offerer,
            ),
        );

        let sdp = match self
            .factory
            .create_offer_for_stream(stream_id, remote_agent)
            .await
        {
            Ok(sdp) => sdp,
            Err(e) => {
                self.fail_stream(stream_id, e.to_string());
                return Err(AgentError::Stream(e.to_string()));
            }
        };

        let payload = SignalingPayload::offer(stream_id, sdp);
        if let Err(e) = self.send_signal(remote_agent, &payload).await {
            self.fail_stream(stream_id, e.to_string());
            return Err(e);
        }

        if let Some(mut stream) = self.streams.get_mut(stream_id) {
            stream.state = StreamState::Offered;
        }
        tracing::debug!(stream_id, remote_agent, "offer sent");
        Ok(())
    }

    /// Demultiplexes one inbound signaling payload from `from`.
    ///
    /// Never fails out: contract violations and backend errors are
    /// logged, and failures surface as [`StreamEvent::Failed`].
    pub async fn handle_signal(&self, from: &str, payload: SignalingPayload) {
        match payload.kind {
            SignalKind::Offer => {
                // validated by the payload parser
                let sdp = payload.sdp.unwrap_or_default();
                self.handle_offer(from, &payload.stream_id, sdp).await;
            }
            SignalKind::Answer => {
                let sdp = payload.sdp.unwrap_or_default();
                self.handle_answer(from, &payload.stream_id, sdp).await;
            }
            SignalKind::Ice => {
                if let Some(candidate) = payload.ice_candidate {
                    self.handle_ice(from, &payload.stream_id, candidate).await;
                }
            }
        }
    }

    async fn handle_offer(&self, from: &str, stream_id: &str, sdp: String) {
        // Mutate the table first, then talk to the backend with no
        // guard held.
        let pending = match self.streams.entry(stream_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let stream = occupied.get_mut();
                match (stream.role, stream.state) {
                    // placeholder created by early ICE
                    (StreamRole::Answerer, StreamState::New) => {
                        stream.remote_agent = from.to_string();
                        stream.state = StreamState::Offered;
                        stream.drain_pending()
                    }
                    _ => {
                        tracing::warn!(
                            stream_id,
                            from,
                            state = ?stream.state,
                            "unexpected offer dropped"
                        );
                        return;
                    }
                }
            }
            Entry::Vacant(vacant) => {
                let mut stream = StreamSession::new(
                    stream_id.to_string(),
                    from.to_string(),
                    StreamRole::Answerer,
                );
                stream.state = StreamState::Offered;
                vacant.insert(stream);
                VecDeque::new()
            }
        };

        let answer = match self
            .factory
            .create_answer_for_offer(stream_id, from, &sdp)
            .await
        {
            Ok(answer) => answer,
            Err(e) => {
                self.fail_stream(stream_id, e.to_string());
                return;
            }
        };

        let payload = SignalingPayload::answer(stream_id, answer);
        if let Err(e) = self.send_signal(from, &payload).await {
            self.fail_stream(stream_id, e.to_string());
            return;
        }

        if let Some(mut stream) = self.streams.get_mut(stream_id) {
            stream.state = StreamState::Answered;
        }

        // apply candidates that arrived before the offer, in receive order
        for candidate in pending {
            if let Err(e) = self.factory.add_ice_candidate(stream_id, candidate).await {
                tracing::warn!(stream_id, error = %e, "failed to apply buffered candidate");
            }
        }
        tracing::debug!(stream_id, from, "answered offer");
    }

    async fn handle_answer(&self, from: &str, stream_id: &str, sdp: String) {
        let accept = match self.streams.get(stream_id) {
            Some(stream) => {
                stream.role == StreamRole::Offerer
                    && stream.state == StreamState::Offered
                    && stream.remote_agent == from
            }
            None => false,
        };
        if !accept {
            tracing::warn!(stream_id, from, "unexpected answer dropped");
            return;
        }

        if let Err(e) = self.factory.handle_remote_answer(stream_id, &sdp).await {
            self.fail_stream(stream_id, e.to_string());
            return;
        }

        if let Some(mut stream) = self.streams.get_mut(stream_id) {
            stream.state = StreamState::Answered;
        }
        tracing::debug!(stream_id, from, "answer applied");
    }

    async fn handle_ice(&self, from: &str, stream_id: &str, candidate: IceCandidate) {
        let apply = match self.streams.entry(stream_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let stream = occupied.get_mut();
                match stream.state {
                    // no peer connection yet: buffer
                    StreamState::New => {
                        stream.buffer_candidate(candidate.clone());
                        false
                    }
                    StreamState::Failed | StreamState::Closed => false,
                    _ => true,
                }
            }
            Entry::Vacant(vacant) => {
                // ICE before the offer: create a placeholder and buffer
                let mut stream = StreamSession::new(
                    stream_id.to_string(),
                    from.to_string(),
                    StreamRole::Answerer,
                );
                stream.buffer_candidate(candidate.clone());
                vacant.insert(stream);
                false
            }
        };

        if apply {
            if let Err(e) = self.factory.add_ice_candidate(stream_id, candidate).await {
                tracing::warn!(stream_id, error = %e, "failed to apply candidate");
            }
        }
    }

    /// Reports a peer connection reaching the connected state; wired
    /// by the embedding host from its factory callbacks.
    pub fn peer_connected(&self, stream_id: &str) {
        let remote_agent = match self.streams.get_mut(stream_id) {
            Some(mut stream) => {
                stream.state = StreamState::Connected;
                stream.remote_agent.clone()
            }
            None => return,
        };
        self.emit(StreamEvent::Connected {
            stream_id: stream_id.to_string(),
            remote_agent,
        });
    }

    /// Reports a peer connection failure; the stream entry is removed
    /// and the user handler is notified.
    pub fn peer_failed(&self, stream_id: &str, reason: impl Into<String>) {
        self.fail_stream(stream_id, reason.into());
    }

    /// Closes a stream and tears down its peer connection.
    pub async fn close_stream(&self, stream_id: &str) {
        if self.streams.remove(stream_id).is_none() {
            return;
        }
        self.factory.close_peer_connection(stream_id).await;
        self.emit(StreamEvent::Closed {
            stream_id: stream_id.to_string(),
        });
    }

    /// Closes every stream; used at disconnect.
    pub async fn close_all(&self) {
        let stream_ids: Vec<String> = self
            .streams
            .iter()
            .map(|entry| entry.stream_id.clone())
            .collect();
        for stream_id in stream_ids {
            self.close_stream(&stream_id).await;
        }
    }

    /// Host-migration hook: offers to every peer the router has no
    /// stream with. The manager calls this when the local agent
    /// becomes host after the previous host left.
    pub async fn reestablish(&self, peers: &[String]) {
        for peer in peers {
            if peer == self.outbox.agent_name() || self.has_stream_with(peer) {
                continue;
            }
            let stream_id = Uuid::new_v4().to_string();
            if let Err(e) = self.open_stream(&stream_id, peer, true).await {
                tracing::warn!(peer = %peer, error = %e, "failed to re-establish stream");
            }
        }
    }

    fn fail_stream(&self, stream_id: &str, reason: String) {
        let remote_agent = self
            .streams
            .remove(stream_id)
            .map(|(_, stream)| stream.remote_agent)
            .unwrap_or_default();
        tracing::warn!(stream_id, reason = %reason, "stream failed");
        self.emit(StreamEvent::Failed {
            stream_id: stream_id.to_string(),
            remote_agent,
            reason,
        });
    }

    fn emit(&self, event: StreamEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            tracing::warn!(error = %e, "stream event dropped - receiver missing or lagging");
        }
    }

    async fn send_signal(&self, to: &str, payload: &SignalingPayload) -> Result<()> {
        let content = payload.to_content()?;
        let event = self
            .outbox
            .make_event(EventType::WebrtcSignaling, to, content);
        self.outbox.send(event).await?;
        Ok(())
    }
}
