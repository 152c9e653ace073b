//! The connection manager: lifecycle, host election, and the
//! caller-facing send/receive surface.
//!
//! A [`ChannelAgent`] owns one session at a time. `connect` performs
//! the broker handshake, derives (or requests) the channel secret,
//! persists the session id, and wires the receive pipeline, password
//! exchange, and signaling router together. `disconnect` is idempotent
//! and cancels the background worker at its next loop boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use protocol::event::{AgentInfo, EventMessage, EventMessageResult, EventType};
use protocol::keys::{AgentKeyPair, ChannelCredentials};
use protocol::wire::{DatagramPull, DatagramPush, ReceiveConfig, SendRequest};
use serde::Serialize;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ConnectConfig;
use crate::error::{AgentError, Result};
use crate::handshake::{PasswordExchange, PasswordRequestPolicy};
use crate::outbox::Outbox;
use crate::receive::{EventHandler, ReceivePipeline, StartAt};
use crate::session::{FileSessionStore, Session, SessionStore};
use crate::signaling::{
    PeerConnectionFactory, SignalingRouter, StreamEvent, UnsupportedPeerConnectionFactory,
};
use crate::transport::{Transport, TransportError, UdpBridge};

/// Delay between pipeline polls while waiting for a password reply
/// without a running worker.
const PASSWORD_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Delay before re-polling after a failed pull during a password wait.
const PASSWORD_POLL_RETRY: Duration = Duration::from_millis(250);

/// Serializable snapshot of the live session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub channel_id: String,
    pub agent_name: String,
    pub connection_time: u64,
}

/// Everything tied to one live session.
#[derive(Clone)]
struct ConnectedState {
    session: Arc<Session>,
    pipeline: Arc<ReceivePipeline>,
    handshake: Arc<PasswordExchange>,
    router: Arc<SignalingRouter>,
    agents: Arc<RwLock<Vec<AgentInfo>>>,
    /// Key the session id was persisted under.
    store_key: String,
}

/// The agent facade: one channel connection and its components.
///
/// Cheap to clone; clones share the same connection state.
#[derive(Clone)]
pub struct ChannelAgent {
    transport: Arc<dyn Transport>,
    store: Arc<dyn SessionStore>,
    factory: Arc<dyn PeerConnectionFactory>,
    datagram: Option<Arc<UdpBridge>>,
    policy: Arc<std::sync::RwLock<Option<Arc<dyn PasswordRequestPolicy>>>>,
    ready: Arc<AtomicBool>,
    state: Arc<RwLock<Option<ConnectedState>>>,
}

impl ChannelAgent {
    /// Creates an agent over the given transport with the default
    /// session store (home directory) and no peer-connection backend.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            store: Arc::new(FileSessionStore::in_home_dir()),
            factory: Arc::new(UnsupportedPeerConnectionFactory),
            datagram: None,
            policy: Arc::new(std::sync::RwLock::new(None)),
            ready: Arc::new(AtomicBool::new(false)),
            state: Arc::new(RwLock::new(None)),
        }
    }

    /// Replaces the session store.
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = store;
        self
    }

    /// Installs the peer-connection backend used by the signaling
    /// router.
    pub fn with_peer_connection_factory(mut self, factory: Arc<dyn PeerConnectionFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Attaches a datagram bridge for the low-latency path.
    pub fn with_datagram_bridge(mut self, bridge: Arc<UdpBridge>) -> Self {
        self.datagram = Some(bridge);
        self
    }

    /// Installs the password-request reply policy. Applies to the
    /// current session, if any, and to future sessions.
    pub async fn set_password_request_policy(&self, policy: Arc<dyn PasswordRequestPolicy>) {
        if let Ok(mut slot) = self.policy.write() {
            *slot = Some(policy.clone());
        }
        if let Ok(connected) = self.connected().await {
            connected.handshake.set_policy(policy);
        }
    }

    // -----------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------

    /// Connects to the channel described by `config`.
    ///
    /// Fails with [`AgentError::AlreadyConnected`] on a live session
    /// and [`AgentError::HandshakeFailed`] when the broker does not
    /// issue a session id. When the configuration carries no
    /// credentials, a password request is broadcast without blocking
    /// the connect.
    pub async fn connect(&self, config: ConnectConfig) -> Result<()> {
        config.validate()?;

        let mut state = self.state.write().await;
        if state.is_some() {
            return Err(AgentError::AlreadyConnected);
        }

        // resolve a resumable session id
        let mut session_id = config.session_id.clone();
        if session_id.is_none() && config.check_last_session {
            if let Some(key) = config.session_store_key() {
                session_id = self.store.load(key);
                if let Some(resumed) = &session_id {
                    tracing::info!(session_id = %resumed, "resuming persisted session");
                }
            }
        }

        // fresh RSA keys for this session; generation is CPU-bound
        let key_pair = tokio::task::spawn_blocking(AgentKeyPair::generate)
            .await
            .map_err(|e| AgentError::HandshakeFailed(format!("key generation task: {}", e)))??;

        let request = config.to_handshake_request(session_id);
        let response = match self.transport.handshake(request).await {
            Ok(response) => response,
            Err(TransportError::Rejected { status }) => {
                return Err(AgentError::HandshakeFailed(format!(
                    "broker rejected handshake: status {}",
                    status
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let session_id = response.session_id.ok_or_else(|| {
            AgentError::HandshakeFailed("broker did not return a session id".to_string())
        })?;

        let session = Arc::new(Session::new(
            session_id.clone(),
            response.channel_id.clone(),
            config.agent_name.clone(),
            response.date,
            response.state,
            config.receive_limit,
            key_pair,
        ));

        if let (Some(channel_name), Some(channel_password)) =
            (config.channel_name.clone(), config.channel_password.clone())
        {
            session
                .install_credentials(ChannelCredentials {
                    channel_name,
                    channel_password,
                })
                .await?;
        }

        // best-effort persistence, keyed by channel id
        if let Err(e) = self.store.save(&response.channel_id, &session_id) {
            tracing::warn!(error = %e, "failed to persist session id");
        }

        let outbox = Outbox::new(
            self.transport.clone(),
            session_id,
            config.agent_name.clone(),
        );
        let handshake = Arc::new(PasswordExchange::new(session.clone(), outbox.clone()));
        if let Some(policy) = self.policy.read().ok().and_then(|slot| slot.clone()) {
            handshake.set_policy(policy);
        }
        let router = Arc::new(SignalingRouter::new(self.factory.clone(), outbox));
        let presence = Arc::new(Notify::new());
        let pipeline = Arc::new(ReceivePipeline::new(
            self.transport.clone(),
            session.clone(),
            handshake.clone(),
            router.clone(),
            presence.clone(),
            self.ready.clone(),
        ));

        *state = Some(ConnectedState {
            session: session.clone(),
            pipeline: pipeline.clone(),
            handshake: handshake.clone(),
            router,
            agents: Arc::new(RwLock::new(Vec::new())),
            store_key: response.channel_id.clone(),
        });
        self.ready.store(true, Ordering::SeqCst);
        drop(state);

        self.spawn_presence_watcher(presence, pipeline.cancellation());

        // no credentials yet: ask the channel, without blocking connect
        if !session.has_secret().await {
            let handshake = handshake.clone();
            tokio::spawn(async move {
                if let Err(e) = handshake.broadcast_request().await {
                    tracing::warn!(error = %e, "failed to broadcast password request");
                }
            });
        }

        tracing::info!(
            channel_id = %response.channel_id,
            agent_name = %config.agent_name,
            "connected"
        );
        Ok(())
    }

    /// Disconnects and clears the persisted session id. Idempotent: a
    /// second call succeeds without any network request.
    pub async fn disconnect(&self) -> Result<bool> {
        self.disconnect_inner(true).await
    }

    /// Disconnects but keeps the persisted session id for a later
    /// resume.
    pub async fn disconnect_preserving_session(&self) -> Result<bool> {
        self.disconnect_inner(false).await
    }

    /// Beacon-style disconnect for forced shutdown: tears down local
    /// state immediately and fires the server-side disconnect without
    /// waiting for the reply.
    pub fn disconnect_beacon(&self) {
        self.ready.store(false, Ordering::SeqCst);
        let agent = self.clone();
        tokio::spawn(async move {
            let _ = agent.disconnect_inner(false).await;
        });
    }

    async fn disconnect_inner(&self, clear_persisted: bool) -> Result<bool> {
        let taken = self.state.write().await.take();
        self.ready.store(false, Ordering::SeqCst);

        let Some(connected) = taken else {
            return Ok(true);
        };

        connected.pipeline.stop();
        connected.router.close_all().await;

        if let Err(e) = self
            .transport
            .disconnect(&connected.session.session_id)
            .await
        {
            tracing::warn!(error = %e, "server-side disconnect failed");
        }

        if clear_persisted {
            if let Err(e) = self.store.clear(&connected.store_key) {
                tracing::warn!(error = %e, "failed to clear persisted session id");
            }
        }

        tracing::info!(session_id = %connected.session.session_id, "disconnected");
        Ok(true)
    }

    /// Whether a session is live.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn connected(&self) -> Result<ConnectedState> {
        self.state
            .read()
            .await
            .clone()
            .ok_or(AgentError::NotConnected)
    }

    /// Snapshot of the live session, if any.
    pub async fn session_summary(&self) -> Option<SessionSummary> {
        let state = self.state.read().await;
        state.as_ref().map(|connected| SessionSummary {
            session_id: connected.session.session_id.clone(),
            channel_id: connected.session.channel_id.clone(),
            agent_name: connected.session.agent_name.clone(),
            connection_time: connected.session.connection_time,
        })
    }

    /// Cursor replaying the channel instance from its beginning.
    pub async fn initial_receive_config(&self) -> Result<ReceiveConfig> {
        Ok(self.connected().await?.session.initial_cursor)
    }

    /// Cursor positioned at connect time.
    pub async fn current_receive_config(&self) -> Result<ReceiveConfig> {
        Ok(self.connected().await?.session.current_cursor)
    }

    /// Whether the channel secret is available.
    pub async fn has_channel_secret(&self) -> Result<bool> {
        Ok(self.connected().await?.session.has_secret().await)
    }

    // -----------------------------------------------------------------
    // Active agents & host election
    // -----------------------------------------------------------------

    /// Cached active set; fetches from the broker when the cache is
    /// empty.
    pub async fn active_agents(&self) -> Result<Vec<AgentInfo>> {
        let connected = self.connected().await?;
        let cached = connected.agents.read().await.clone();
        if cached.is_empty() {
            return self.refresh_active_agents().await;
        }
        Ok(cached)
    }

    /// Re-pulls the active set and drives the host-migration hook:
    /// when the local agent just became host, missing streams to every
    /// other active agent are re-established.
    pub async fn refresh_active_agents(&self) -> Result<Vec<AgentInfo>> {
        let connected = self.connected().await?;
        let fresh = self
            .transport
            .active_agents(&connected.session.session_id)
            .await?;
        let local = connected.session.agent_name.clone();

        let was_host = {
            let old = connected.agents.read().await;
            elect_host(&old)
                .map(|host| host.agent_name == local)
                .unwrap_or(true)
        };
        *connected.agents.write().await = fresh.clone();
        let now_host = elect_host(&fresh)
            .map(|host| host.agent_name == local)
            .unwrap_or(true);

        if !was_host && now_host {
            tracing::info!("local agent became host, re-establishing missing streams");
            let peers: Vec<String> = fresh
                .iter()
                .map(|agent| agent.agent_name.clone())
                .filter(|name| *name != local)
                .collect();
            connected.router.reestablish(&peers).await;
        }

        Ok(fresh)
    }

    /// Whether the local agent is the channel host: the member with
    /// the minimum `(connection_time, agent_name)`. An empty active
    /// set means the local agent is its own host.
    pub async fn is_host_agent(&self) -> Result<bool> {
        let connected = self.connected().await?;
        let agents = connected.agents.read().await;
        Ok(elect_host(&agents)
            .map(|host| host.agent_name == connected.session.agent_name)
            .unwrap_or(true))
    }

    /// Whether `name` is the channel host.
    pub async fn is_host_agent_named(&self, name: &str) -> Result<bool> {
        let connected = self.connected().await?;
        let agents = connected.agents.read().await;
        Ok(match elect_host(&agents) {
            Some(host) => host.agent_name == name,
            None => name == connected.session.agent_name,
        })
    }

    /// Whether the local agent takes precedence over `remote`, making
    /// it the side that initiates offers toward that peer. Pairwise over
    /// `(connection_time, agent_name)`; an unknown remote falls back
    /// to the global host check.
    pub async fn is_host_relative_to(&self, remote: &str) -> Result<bool> {
        let connected = self.connected().await?;
        let agents = connected.agents.read().await;
        let local = connected.session.agent_name.as_str();
        let local_time = agents
            .iter()
            .find(|agent| agent.agent_name == local)
            .map(|agent| agent.connection_time)
            .unwrap_or(connected.session.connection_time);

        Ok(match agents.iter().find(|agent| agent.agent_name == remote) {
            Some(peer) => {
                (local_time, local) < (peer.connection_time, peer.agent_name.as_str())
            }
            None => elect_host(&agents)
                .map(|host| host.agent_name == local)
                .unwrap_or(true),
        })
    }

    // -----------------------------------------------------------------
    // Send & receive
    // -----------------------------------------------------------------

    /// Sends a chat-text event, sealed under the channel secret when
    /// `encrypt` is set.
    pub async fn send_message(&self, to: &str, content: &str, encrypt: bool) -> Result<()> {
        self.send_event(EventType::ChatText, to, content, None, encrypt)
            .await
    }

    /// Sends an application-defined event.
    pub async fn send_custom(
        &self,
        to: &str,
        custom_type: &str,
        content: &str,
        encrypt: bool,
    ) -> Result<()> {
        self.send_event(
            EventType::Custom,
            to,
            content,
            Some(custom_type.to_string()),
            encrypt,
        )
        .await
    }

    async fn send_event(
        &self,
        event_type: EventType,
        to: &str,
        content: &str,
        custom_type: Option<String>,
        encrypt: bool,
    ) -> Result<()> {
        let connected = self.connected().await?;
        let mut event = EventMessage {
            id: Uuid::new_v4().to_string(),
            event_type,
            from: connected.session.agent_name.clone(),
            to: to.to_string(),
            date: 0,
            content: content.to_string(),
            encrypted: false,
            custom_type,
        };
        if encrypt {
            connected.session.seal_event(&mut event).await?;
        }
        self.transport
            .send(SendRequest {
                session_id: connected.session.session_id.clone(),
                event,
            })
            .await?;
        Ok(())
    }

    /// Single pull at a caller-owned cursor; see
    /// [`ReceivePipeline::receive_at`] semantics.
    pub async fn receive(&self, cursor: ReceiveConfig) -> Result<EventMessageResult> {
        let connected = self.connected().await?;
        connected.pipeline.receive_at(cursor).await
    }

    /// Starts the background receive worker. Returns false when one is
    /// already running (the second start is otherwise ignored).
    pub async fn receive_async(
        &self,
        handler: Arc<dyn EventHandler>,
        start_at: StartAt,
    ) -> Result<bool> {
        let connected = self.connected().await?;
        Ok(connected.pipeline.start_worker(handler, start_at))
    }

    /// Broadcasts a password request and waits up to `timeout` for the
    /// secret.
    ///
    /// A zero timeout still broadcasts the request but returns `false`
    /// immediately without waiting for a reply (fire-and-forget).
    pub async fn request_password(&self, timeout: Duration) -> Result<bool> {
        let connected = self.connected().await?;
        if connected.session.has_secret().await {
            return Ok(true);
        }
        connected.handshake.broadcast_request().await?;
        if timeout.is_zero() {
            return Ok(false);
        }

        if connected.pipeline.worker_active() {
            // the worker consumes the reply; just wait for publication
            return Ok(connected.session.wait_for_secret(timeout).await);
        }

        // no worker: poll the pipeline ourselves until the deadline
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if connected.session.has_secret().await {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            match connected.pipeline.poll_once().await {
                Ok(_) => tokio::time::sleep(PASSWORD_POLL_INTERVAL).await,
                Err(e) => {
                    tracing::debug!(error = %e, "password poll failed, retrying");
                    tokio::time::sleep(PASSWORD_POLL_RETRY).await;
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Datagram bridge
    // -----------------------------------------------------------------

    /// Fire-and-forget ephemeral push over the datagram bridge.
    pub async fn udp_push(&self, to: &str, content: &str) -> Result<()> {
        let connected = self.connected().await?;
        let bridge = self.datagram.as_ref().ok_or(AgentError::Transport(
            TransportError::Unavailable("datagram bridge not configured".to_string()),
        ))?;
        bridge
            .push(DatagramPush {
                session_id: connected.session.session_id.clone(),
                to: to.to_string(),
                content: content.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Polls the datagram bridge; same result shape as the control
    /// receive.
    pub async fn udp_pull(&self, cursor: ReceiveConfig) -> Result<EventMessageResult> {
        let connected = self.connected().await?;
        let bridge = self.datagram.as_ref().ok_or(AgentError::Transport(
            TransportError::Unavailable("datagram bridge not configured".to_string()),
        ))?;
        Ok(bridge
            .pull(DatagramPull {
                session_id: connected.session.session_id.clone(),
                cursor,
            })
            .await?)
    }

    // -----------------------------------------------------------------
    // Signaling
    // -----------------------------------------------------------------

    /// Opens a signaling stream toward `remote_agent`. Only the side
    /// holding host precedence sends the offer; the other side waits
    /// for it, which prevents glare.
    pub async fn open_stream(&self, stream_id: &str, remote_agent: &str) -> Result<()> {
        // make sure the election sees a populated active set
        if let Err(e) = self.active_agents().await {
            tracing::debug!(error = %e, "active agent lookup failed before open_stream");
        }
        let initiate = self.is_host_relative_to(remote_agent).await?;
        let connected = self.connected().await?;
        connected
            .router
            .open_stream(stream_id, remote_agent, initiate)
            .await
    }

    /// Closes a signaling stream.
    pub async fn close_stream(&self, stream_id: &str) -> Result<()> {
        let connected = self.connected().await?;
        connected.router.close_stream(stream_id).await;
        Ok(())
    }

    /// Takes the stream event receiver (once per session).
    pub async fn stream_events(&self) -> Result<Option<mpsc::Receiver<StreamEvent>>> {
        Ok(self.connected().await?.router.events())
    }

    /// Handle to the signaling router, for wiring peer-connection
    /// state callbacks from the factory backend.
    pub async fn signaling_router(&self) -> Result<Arc<SignalingRouter>> {
        Ok(self.connected().await?.router.clone())
    }

    fn spawn_presence_watcher(&self, presence: Arc<Notify>, cancel: CancellationToken) {
        let agent = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = presence.notified() => {
                        if let Err(e) = agent.refresh_active_agents().await {
                            tracing::debug!(error = %e, "active agent refresh failed");
                        }
                    }
                }
            }
        });
    }
}

/// The host of an active set: minimum `(connection_time, agent_name)`.
/// Ties on connection time are broken lexicographically so the order
/// is total.
fn elect_host(agents: &[AgentInfo]) -> Option<&AgentInfo> {
    agents.iter().min_by(|a, b| {
        (a.connection_time, a.agent_name.as_str()).cmp(&(b.connection_time, b.agent_name.as_str()))
    })
}
