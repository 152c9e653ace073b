//! Per-connect session state.
//!
//! A [`Session`] is created from a successful broker handshake and
//! lives until disconnect. Most fields are written once; the channel
//! credentials and the derived secret may arrive later through the
//! password handshake, so they live behind a lock with a notification
//! published when the secret becomes available.

pub mod store;

use std::time::Duration;

use protocol::keys::{AgentKeyPair, ChannelCredentials};
use protocol::secret::{derive_channel_secret, event_aad, ChannelSecret};
use protocol::wire::{ChannelState, ReceiveConfig};
use protocol::{EventMessage, ProtocolError};
use tokio::sync::{Notify, RwLock};

pub use store::{FileSessionStore, SessionStore};

/// State of one agent session on a channel.
pub struct Session {
    /// Opaque broker-issued session id.
    pub session_id: String,
    /// Channel this session belongs to.
    pub channel_id: String,
    /// The local agent's name.
    pub agent_name: String,
    /// Broker-recorded connect time, epoch milliseconds. Authoritative
    /// for host election and for the auto-routing history filter.
    pub connection_time: u64,
    /// Earliest readable position of the channel instance.
    pub initial_cursor: ReceiveConfig,
    /// Position at connect time; reads from here see only new traffic.
    pub current_cursor: ReceiveConfig,

    key_pair: AgentKeyPair,
    credentials: RwLock<Option<ChannelCredentials>>,
    secret: RwLock<Option<ChannelSecret>>,
    secret_ready: Notify,
}

impl Session {
    /// Builds a session from the handshake response fields.
    pub fn new(
        session_id: String,
        channel_id: String,
        agent_name: String,
        connection_time: u64,
        state: ChannelState,
        receive_limit: u32,
        key_pair: AgentKeyPair,
    ) -> Self {
        let initial_cursor =
            ReceiveConfig::new(state.instance_start(), 0).with_limit(receive_limit);
        let current_cursor =
            ReceiveConfig::new(state.global_offset, state.local_offset).with_limit(receive_limit);
        Self {
            session_id,
            channel_id,
            agent_name,
            connection_time,
            initial_cursor,
            current_cursor,
            key_pair,
            credentials: RwLock::new(None),
            secret: RwLock::new(None),
            secret_ready: Notify::new(),
        }
    }

    /// The session's ephemeral RSA key pair.
    pub fn key_pair(&self) -> &AgentKeyPair {
        &self.key_pair
    }

    /// Snapshot of the channel credentials, when known.
    pub async fn credentials(&self) -> Option<ChannelCredentials> {
        self.credentials.read().await.clone()
    }

    /// Snapshot of the derived channel secret, when available.
    pub async fn secret(&self) -> Option<ChannelSecret> {
        self.secret.read().await.clone()
    }

    /// Whether the channel secret has been derived. This is the
    /// authoritative "channel unlocked" predicate.
    pub async fn has_secret(&self) -> bool {
        self.secret.read().await.is_some()
    }

    /// Installs credentials and derives the channel secret, unless
    /// credentials are already present. Returns whether the install
    /// took effect. Waiters on [`Session::wait_for_secret`] are woken
    /// when the secret is published.
    pub async fn install_credentials(
        &self,
        incoming: ChannelCredentials,
    ) -> Result<bool, ProtocolError> {
        {
            let credentials = self.credentials.read().await;
            if credentials.is_some() {
                return Ok(false);
            }
        }

        // Derivation is CPU-bound; keep it off the async executor.
        let derived = tokio::task::spawn_blocking({
            let name = incoming.channel_name.clone();
            let password = incoming.channel_password.clone();
            move || derive_channel_secret(&name, &password)
        })
        .await
        .map_err(|e| ProtocolError::Encryption(format!("derivation task failed: {}", e)))?;

        let mut credentials = self.credentials.write().await;
        if credentials.is_some() {
            // lost the race to another installer
            return Ok(false);
        }
        *credentials = Some(incoming);
        *self.secret.write().await = Some(derived);
        self.secret_ready.notify_waiters();
        Ok(true)
    }

    /// Waits up to `timeout` for the channel secret to become
    /// available. Returns whether it is present on exit.
    pub async fn wait_for_secret(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.secret_ready.notified();
            tokio::pin!(notified);
            // register before the check so a concurrent publication
            // cannot slip between them
            notified.as_mut().enable();
            if self.has_secret().await {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.has_secret().await;
            }
        }
    }

    /// Seals an outbound event's content under the channel secret and
    /// sets its `encrypted` flag.
    pub async fn seal_event(&self, event: &mut EventMessage) -> Result<(), ProtocolError> {
        let secret = self.secret().await.ok_or(ProtocolError::MissingSecret)?;
        let aad = event_aad(event.event_type, &event.from, &event.to);
        event.content = secret.seal(event.content.as_bytes(), &aad)?;
        event.encrypted = true;
        Ok(())
    }

    /// Opens an inbound event in place: verifies and decrypts the
    /// content and clears the `encrypted` flag. A plaintext event
    /// passes through untouched.
    pub async fn open_event(&self, event: &mut EventMessage) -> Result<(), ProtocolError> {
        if !event.encrypted {
            return Ok(());
        }
        let secret = self.secret().await.ok_or(ProtocolError::MissingSecret)?;
        let aad = event_aad(event.event_type, &event.from, &event.to);
        let plaintext = secret.open(&event.content, &aad)?;
        event.content = String::from_utf8(plaintext)
            .map_err(|e| ProtocolError::AuthDecrypt(format!("payload is not utf-8: {}", e)))?;
        event.encrypted = false;
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("channel_id", &self.channel_id)
            .field("agent_name", &self.agent_name)
            .field("connection_time", &self.connection_time)
            .finish_non_exhaustive()
    }
}
