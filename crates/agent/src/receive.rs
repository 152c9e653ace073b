//! The dual-offset receive pipeline.
//!
//! One pull returns a durable batch and an ephemeral batch plus the
//! next cursor position. The pipeline decrypts sealed payloads
//! (dropping anything that fails authentication), auto-routes the
//! protocol's own traffic (password handshake events to the crypto
//! layer, signaling envelopes to the router) and hands the rest to
//! the user handler, ephemeral events first.
//!
//! The background worker is a single owned task per session. A second
//! start is rejected silently; disconnect cancels the worker at the
//! next loop boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use protocol::event::{EventMessage, EventMessageResult, EventType};
use protocol::signaling::SignalingPayload;
use protocol::wire::ReceiveConfig;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::handshake::PasswordExchange;
use crate::session::Session;
use crate::signaling::SignalingRouter;
use crate::transport::Transport;

/// Delay before retrying after a failed pull.
const PULL_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Delay after an empty batch, for brokers that do not long-poll.
const IDLE_DELAY: Duration = Duration::from_millis(50);

/// Where `receive_async` starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAt {
    /// Replay the channel instance from its earliest readable
    /// position.
    InstanceStart,
    /// Read only traffic newer than the connect position.
    Current,
}

/// Callbacks invoked by the background receive worker.
///
/// Ephemeral events of a batch are dispatched before its durable
/// events. Events consumed by auto-routing (password handshake,
/// foreign signaling) are not re-delivered here.
pub trait EventHandler: Send + Sync {
    /// A durable event.
    fn on_event(&self, event: EventMessage);

    /// An ephemeral event; defaults to the durable path.
    fn on_ephemeral_event(&self, event: EventMessage) {
        self.on_event(event);
    }
}

/// One processed batch: events paired with whether auto-routing
/// consumed them.
pub(crate) struct PreparedBatch {
    pub ephemeral: Vec<(EventMessage, bool)>,
    pub durable: Vec<(EventMessage, bool)>,
    pub next_global_offset: u64,
    pub next_local_offset: u64,
}

impl PreparedBatch {
    fn is_empty(&self) -> bool {
        self.ephemeral.is_empty() && self.durable.is_empty()
    }
}

/// The receive pipeline for one session.
pub(crate) struct ReceivePipeline {
    transport: Arc<dyn Transport>,
    session: Arc<Session>,
    handshake: Arc<PasswordExchange>,
    router: Arc<SignalingRouter>,
    /// Pinged when presence events arrive; the manager refreshes the
    /// active set.
    presence: Arc<Notify>,
    ready: Arc<AtomicBool>,
    /// Live cursor, owned by the worker (or by `poll_once` callers
    /// while no worker runs).
    cursor: Mutex<ReceiveConfig>,
    worker_started: AtomicBool,
    cancel: CancellationToken,
}

impl ReceivePipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Arc<Session>,
        handshake: Arc<PasswordExchange>,
        router: Arc<SignalingRouter>,
        presence: Arc<Notify>,
        ready: Arc<AtomicBool>,
    ) -> Self {
        let cursor = session.current_cursor;
        Self {
            transport,
            session,
            handshake,
            router,
            presence,
            ready,
            cursor: Mutex::new(cursor),
            worker_started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Snapshot of the live cursor.
    pub async fn cursor_snapshot(&self) -> ReceiveConfig {
        *self.cursor.lock().await
    }

    /// Whether the background worker was started.
    pub fn worker_active(&self) -> bool {
        self.worker_started.load(Ordering::SeqCst)
    }

    /// Cancels the worker at its next loop boundary.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Token cancelled when the pipeline stops; used by auxiliary
    /// tasks tied to the session lifetime.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Single pull at a caller-owned cursor.
    ///
    /// The returned batch has been decrypted and scanned for auto
    /// events exactly once; events failing authentication are gone.
    /// The caller advances its cursor from the `next_*` fields; on
    /// error nothing advances.
    pub async fn receive_at(&self, cursor: ReceiveConfig) -> Result<EventMessageResult> {
        let batch = self
            .transport
            .receive(&self.session.session_id, cursor)
            .await?;
        let prepared = self.prepare(batch).await;
        Ok(EventMessageResult {
            ephemeral_events: prepared.ephemeral.into_iter().map(|(e, _)| e).collect(),
            events: prepared.durable.into_iter().map(|(e, _)| e).collect(),
            next_global_offset: prepared.next_global_offset,
            next_local_offset: prepared.next_local_offset,
        })
    }

    /// Pulls at the live cursor and advances it on success.
    pub async fn poll_once(&self) -> Result<PreparedBatch> {
        let mut cursor = self.cursor.lock().await;
        let batch = self
            .transport
            .receive(&self.session.session_id, *cursor)
            .await?;
        let prepared = self.prepare(batch).await;
        *cursor = cursor.advanced_to(prepared.next_global_offset, prepared.next_local_offset);
        Ok(prepared)
    }

    /// Starts the background worker. Returns false (and does nothing)
    /// if one is already running.
    pub fn start_worker(
        self: &Arc<Self>,
        handler: Arc<dyn EventHandler>,
        start_at: StartAt,
    ) -> bool {
        if self.worker_started.swap(true, Ordering::SeqCst) {
            tracing::debug!("receive worker already running, start ignored");
            return false;
        }

        let pipeline = self.clone();
        tokio::spawn(async move {
            {
                let mut cursor = pipeline.cursor.lock().await;
                *cursor = match start_at {
                    StartAt::InstanceStart => pipeline.session.initial_cursor,
                    StartAt::Current => pipeline.session.current_cursor,
                };
            }
            pipeline.run_worker(handler).await;
        });
        true
    }

    async fn run_worker(&self, handler: Arc<dyn EventHandler>) {
        tracing::debug!(session_id = %self.session.session_id, "receive worker started");
        loop {
            if !self.ready.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
                break;
            }

            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.poll_once() => result,
            };

            match result {
                Ok(prepared) => {
                    let was_empty = prepared.is_empty();
                    // ephemeral dispatch strictly precedes durable
                    for (event, consumed) in prepared.ephemeral {
                        if !consumed {
                            handler.on_ephemeral_event(event);
                        }
                    }
                    for (event, consumed) in prepared.durable {
                        if !consumed {
                            handler.on_event(event);
                        }
                    }
                    if was_empty && !self.pause(IDLE_DELAY).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "receive pull failed, retrying");
                    if !self.pause(PULL_RETRY_DELAY).await {
                        break;
                    }
                }
            }
        }
        tracing::debug!(session_id = %self.session.session_id, "receive worker stopped");
    }

    /// Sleeps unless cancelled; returns false on cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Decrypts and auto-routes one raw batch.
    async fn prepare(&self, batch: EventMessageResult) -> PreparedBatch {
        let mut ephemeral = Vec::with_capacity(batch.ephemeral_events.len());
        for event in batch.ephemeral_events {
            if let Some(entry) = self.prepare_event(event).await {
                ephemeral.push(entry);
            }
        }
        let mut durable = Vec::with_capacity(batch.events.len());
        for event in batch.events {
            if let Some(entry) = self.prepare_event(event).await {
                durable.push(entry);
            }
        }
        PreparedBatch {
            ephemeral,
            durable,
            next_global_offset: batch.next_global_offset,
            next_local_offset: batch.next_local_offset,
        }
    }

    async fn prepare_event(&self, mut event: EventMessage) -> Option<(EventMessage, bool)> {
        if event.encrypted {
            if let Err(e) = self.session.open_event(&mut event).await {
                tracing::warn!(
                    event_id = %event.id,
                    from = %event.from,
                    error = %e,
                    "event failed authentication, dropped"
                );
                return None;
            }
        }
        let consumed = self.route(&event).await;
        Some((event, consumed))
    }

    /// Applies the auto-routing rules to one event. Returns whether a
    /// component consumed it. Replayed history (events at or before
    /// the session's connection time) never triggers a route.
    async fn route(&self, event: &EventMessage) -> bool {
        if event.date <= self.session.connection_time {
            return false;
        }
        match event.event_type {
            EventType::PasswordRequest => {
                self.handshake.handle_request(event).await;
                true
            }
            EventType::PasswordReply if event.to == self.session.agent_name => {
                self.handshake.handle_reply(event).await;
                true
            }
            EventType::WebrtcSignaling if event.from != self.session.agent_name => {
                match SignalingPayload::from_content(&event.content) {
                    Ok(payload) => self.router.handle_signal(&event.from, payload).await,
                    Err(e) => {
                        tracing::warn!(from = %event.from, error = %e, "signaling event dropped");
                    }
                }
                true
            }
            EventType::AgentJoin | EventType::AgentLeave => {
                // membership changed; the manager refreshes the active set
                self.presence.notify_one();
                false
            }
            _ => false,
        }
    }
}
