//! Shared test doubles for the crate's unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use protocol::event::{AgentInfo, EventMessage, EventMessageResult, EventType};
use protocol::keys::AgentKeyPair;
use protocol::wire::{ChannelState, HandshakeRequest, HandshakeResponse, ReceiveConfig, SendRequest};

use crate::session::Session;
use crate::transport::{BoxFuture, Transport, TransportError, TransportResult};

/// One shared RSA key pair; generation is expensive and most tests do
/// not care about key identity.
pub(crate) fn test_key_pair() -> AgentKeyPair {
    static KEYS: OnceLock<AgentKeyPair> = OnceLock::new();
    KEYS.get_or_init(|| AgentKeyPair::generate().expect("key generation"))
        .clone()
}

/// Builds a session as if a handshake at connection time 1000 had
/// succeeded, with the offsets of the fresh-connect scenario.
pub(crate) fn make_session(agent_name: &str) -> Arc<Session> {
    Arc::new(Session::new(
        "S1".to_string(),
        "C1".to_string(),
        agent_name.to_string(),
        1000,
        ChannelState {
            global_offset: 40,
            local_offset: 4,
            original_global_offset: Some(36),
        },
        20,
        test_key_pair(),
    ))
}

/// Builds a plaintext event.
pub(crate) fn make_event(
    event_type: EventType,
    from: &str,
    to: &str,
    date: u64,
    content: &str,
) -> EventMessage {
    EventMessage {
        id: format!("ev-{}", date),
        event_type,
        from: from.to_string(),
        to: to.to_string(),
        date,
        content: content.to_string(),
        encrypted: false,
        custom_type: None,
    }
}

/// In-memory session store.
#[derive(Default)]
pub(crate) struct MemorySessionStore {
    entries: Mutex<std::collections::HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, key: &str, session_id: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), session_id.to_string());
    }
}

impl crate::session::SessionStore for MemorySessionStore {
    fn load(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn save(&self, key: &str, session_id: &str) -> std::io::Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), session_id.to_string());
        Ok(())
    }

    fn clear(&self, key: &str) -> std::io::Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Transport that records sends; handshake is not supported.
pub(crate) struct RecordingTransport {
    sent: Mutex<Vec<EventMessage>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<EventMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl Transport for RecordingTransport {
    fn handshake(
        &self,
        _request: HandshakeRequest,
    ) -> BoxFuture<'_, TransportResult<HandshakeResponse>> {
        Box::pin(async {
            Err(TransportError::Unavailable(
                "recording transport has no broker".to_string(),
            ))
        })
    }

    fn disconnect(&self, _session_id: &str) -> BoxFuture<'_, TransportResult<bool>> {
        Box::pin(async { Ok(true) })
    }

    fn send(&self, request: SendRequest) -> BoxFuture<'_, TransportResult<()>> {
        self.sent.lock().unwrap().push(request.event);
        Box::pin(async { Ok(()) })
    }

    fn receive(
        &self,
        _session_id: &str,
        cursor: ReceiveConfig,
    ) -> BoxFuture<'_, TransportResult<EventMessageResult>> {
        Box::pin(async move {
            Ok(EventMessageResult {
                next_global_offset: cursor.global_offset,
                next_local_offset: cursor.local_offset,
                ..Default::default()
            })
        })
    }

    fn active_agents(&self, _session_id: &str) -> BoxFuture<'_, TransportResult<Vec<AgentInfo>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

/// Fully scripted transport for connection-manager tests.
///
/// Handshakes answer from a queue; receive pops scripted batches and
/// returns an empty batch at the current cursor once the queue drains.
pub(crate) struct ScriptedTransport {
    handshakes: Mutex<VecDeque<TransportResult<HandshakeResponse>>>,
    batches: Mutex<VecDeque<TransportResult<EventMessageResult>>>,
    pub sent: Mutex<Vec<EventMessage>>,
    pub agents: Mutex<Vec<AgentInfo>>,
    pub handshake_requests: Mutex<Vec<HandshakeRequest>>,
    pub disconnect_calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handshakes: Mutex::new(VecDeque::new()),
            batches: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            agents: Mutex::new(Vec::new()),
            handshake_requests: Mutex::new(Vec::new()),
            disconnect_calls: AtomicUsize::new(0),
        })
    }

    pub fn script_handshake(&self, response: TransportResult<HandshakeResponse>) {
        self.handshakes.lock().unwrap().push_back(response);
    }

    pub fn script_batch(&self, batch: TransportResult<EventMessageResult>) {
        self.batches.lock().unwrap().push_back(batch);
    }

    pub fn sent(&self) -> Vec<EventMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_agents(&self, agents: Vec<AgentInfo>) {
        *self.agents.lock().unwrap() = agents;
    }
}

/// Standard scripted handshake: session S1 on channel C1 at time 1000,
/// offsets matching the fresh-connect scenario.
pub(crate) fn ok_handshake() -> HandshakeResponse {
    HandshakeResponse {
        session_id: Some("S1".to_string()),
        channel_id: "C1".to_string(),
        date: 1000,
        state: ChannelState {
            global_offset: 40,
            local_offset: 4,
            original_global_offset: Some(36),
        },
    }
}

impl Transport for ScriptedTransport {
    fn handshake(
        &self,
        request: HandshakeRequest,
    ) -> BoxFuture<'_, TransportResult<HandshakeResponse>> {
        self.handshake_requests.lock().unwrap().push(request);
        let response = self
            .handshakes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ok_handshake()));
        Box::pin(async move { response })
    }

    fn disconnect(&self, _session_id: &str) -> BoxFuture<'_, TransportResult<bool>> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(true) })
    }

    fn send(&self, request: SendRequest) -> BoxFuture<'_, TransportResult<()>> {
        self.sent.lock().unwrap().push(request.event);
        Box::pin(async { Ok(()) })
    }

    fn receive(
        &self,
        _session_id: &str,
        cursor: ReceiveConfig,
    ) -> BoxFuture<'_, TransportResult<EventMessageResult>> {
        let batch = self.batches.lock().unwrap().pop_front();
        Box::pin(async move {
            match batch {
                Some(batch) => batch,
                None => Ok(EventMessageResult {
                    next_global_offset: cursor.global_offset,
                    next_local_offset: cursor.local_offset,
                    ..Default::default()
                }),
            }
        })
    }

    fn active_agents(&self, _session_id: &str) -> BoxFuture<'_, TransportResult<Vec<AgentInfo>>> {
        let agents = self.agents.lock().unwrap().clone();
        Box::pin(async move { Ok(agents) })
    }
}
