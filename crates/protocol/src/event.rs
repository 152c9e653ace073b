//! Event envelope definitions for the RelayMesh channel protocol.
//!
//! Every message that travels through a channel (chat text, custom
//! application payloads, the password handshake, WebRTC signaling,
//! presence notifications) is carried in the same [`EventMessage`]
//! envelope. The broker assigns `id` and `date` on ingress; everything
//! else is set by the sending agent.

use serde::{Deserialize, Serialize};

/// Address used in the `to` field for channel-wide broadcast.
pub const BROADCAST: &str = "*";

/// The kind of payload carried by an [`EventMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Plain chat text between agents.
    ChatText,
    /// Application-defined payload; `custom_type` names the sub-kind.
    Custom,
    /// A joining agent asking members for the channel credentials.
    PasswordRequest,
    /// RSA-wrapped channel credentials addressed to a single requester.
    PasswordReply,
    /// WebRTC offer/answer/ICE envelope routed by stream id.
    WebrtcSignaling,
    /// Broker presence notification: an agent joined the channel.
    AgentJoin,
    /// Broker presence notification: an agent left the channel.
    AgentLeave,
}

impl EventType {
    /// The wire-format name of this event type, as it appears in the
    /// JSON `type` field and in AEAD associated data.
    pub fn wire_name(&self) -> &'static str {
        match self {
            EventType::ChatText => "CHAT_TEXT",
            EventType::Custom => "CUSTOM",
            EventType::PasswordRequest => "PASSWORD_REQUEST",
            EventType::PasswordReply => "PASSWORD_REPLY",
            EventType::WebrtcSignaling => "WEBRTC_SIGNALING",
            EventType::AgentJoin => "AGENT_JOIN",
            EventType::AgentLeave => "AGENT_LEAVE",
        }
    }
}

/// A single event flowing through a channel.
///
/// When `encrypted` is true, `content` is the opaque output of the
/// channel AEAD (base64 nonce + ciphertext) and must be opened with the
/// channel secret before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    /// Broker-assigned event id.
    pub id: String,
    /// Payload kind.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Sending agent name.
    pub from: String,
    /// Destination agent name, or [`BROADCAST`].
    pub to: String,
    /// Broker-assigned ingress timestamp, epoch milliseconds.
    pub date: u64,
    /// Payload: UTF-8 text, or the opaque sealed form when `encrypted`.
    pub content: String,
    /// Whether `content` is sealed under the channel secret.
    pub encrypted: bool,
    /// Application sub-kind for [`EventType::Custom`] events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_type: Option<String>,
}

impl EventMessage {
    /// Returns true when the event is addressed to every channel member.
    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST
    }

    /// Returns true when the event is addressed to `agent`, either
    /// directly or via broadcast.
    pub fn addressed_to(&self, agent: &str) -> bool {
        self.is_broadcast() || self.to == agent
    }
}

/// One batch returned by a receive pull.
///
/// `ephemeral_events` are never persisted by the broker and must be
/// dispatched before `events` from the same batch. The `next_*` fields
/// are the cursor position for the following pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessageResult {
    /// Durable events in broker insertion order.
    pub events: Vec<EventMessage>,
    /// Best-effort real-time events, dispatched first.
    #[serde(default)]
    pub ephemeral_events: Vec<EventMessage>,
    /// Global cursor position for the next pull.
    pub next_global_offset: u64,
    /// Local cursor position for the next pull.
    pub next_local_offset: u64,
}

impl EventMessageResult {
    /// Returns true when the batch carries no events of either kind.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.ephemeral_events.is_empty()
    }
}

/// Capabilities an agent may announce for a channel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    /// Ordinary durable messaging.
    Messaging,
    /// Willing to relay WebRTC signaling / datagram traffic.
    WebrtcRelay,
    /// Accepts ephemeral events on the low-latency path.
    Ephemeral,
}

/// A participant currently active in the channel.
///
/// `connection_time` is recorded by the broker clock and is unique per
/// agent within one channel instance; it is the host-election key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    /// The agent's channel-unique name.
    pub agent_name: String,
    /// Broker-recorded connect timestamp, epoch milliseconds.
    pub connection_time: u64,
    /// Announced capabilities.
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}
