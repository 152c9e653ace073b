//! Request/response shapes for the broker control path.
//!
//! These types mirror the broker's JSON contract: a handshake that opens
//! a session, batch receive pulls driven by a dual-offset cursor, sends,
//! disconnects, and the active-agent listing. The datagram bridge reuses
//! the same shapes over UDP.

use serde::{Deserialize, Serialize};

use crate::event::{AgentInfo, EventMessage};

/// Default receive batch size. The broker may cap it lower.
pub const DEFAULT_RECEIVE_LIMIT: u32 = 20;

/// Scope of the developer API key presented at handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyScope {
    /// Key usable from untrusted client environments.
    #[default]
    Public,
    /// Key reserved for backend/owned environments.
    Private,
}

/// A dual-offset read position with a batch limit.
///
/// `global_offset` is broker-assigned per channel instance;
/// `local_offset` is per agent session. Both advance monotonically and
/// only on successful pulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveConfig {
    /// Position in the channel instance's durable log.
    pub global_offset: u64,
    /// Position in the per-session delivery stream.
    pub local_offset: u64,
    /// Maximum number of durable events per pull.
    pub limit: u32,
}

impl ReceiveConfig {
    /// Creates a cursor at the given offsets with the default limit.
    pub fn new(global_offset: u64, local_offset: u64) -> Self {
        Self {
            global_offset,
            local_offset,
            limit: DEFAULT_RECEIVE_LIMIT,
        }
    }

    /// Replaces the batch limit.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Returns the cursor advanced to the position reported by a pull.
    ///
    /// Offsets never move backwards; a stale server response leaves the
    /// cursor where it was.
    pub fn advanced_to(&self, next_global: u64, next_local: u64) -> Self {
        Self {
            global_offset: self.global_offset.max(next_global),
            local_offset: self.local_offset.max(next_local),
            limit: self.limit,
        }
    }
}

/// Offset state returned by the broker at handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelState {
    /// Current end of the durable log.
    pub global_offset: u64,
    /// Current per-session position.
    pub local_offset: u64,
    /// Start of the current channel instance, when known.
    #[serde(default)]
    pub original_global_offset: Option<u64>,
}

impl ChannelState {
    /// The earliest readable position of this channel instance, used to
    /// replay from the beginning. Falls back to the current global
    /// offset when the broker did not report an instance start.
    pub fn instance_start(&self) -> u64 {
        self.original_global_offset.unwrap_or(self.global_offset)
    }
}

/// Handshake request submitted on connect.
///
/// Either `channel_id` or the `(channel_name, channel_password)` pair
/// must be present; the config layer validates this before the request
/// is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    pub agent_name: String,
    /// Resume token from a previous session, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub enable_webrtc_relay: bool,
    pub api_key_scope: ApiKeyScope,
}

/// Handshake response. A missing `session_id` means the handshake
/// failed regardless of transport status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponse {
    #[serde(default)]
    pub session_id: Option<String>,
    pub channel_id: String,
    /// Broker-recorded connection time, epoch milliseconds. This value
    /// is authoritative for host election.
    pub date: u64,
    pub state: ChannelState,
}

/// A receive pull on the control path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveRequest {
    pub session_id: String,
    #[serde(flatten)]
    pub cursor: ReceiveConfig,
}

/// An outbound event submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub session_id: String,
    pub event: EventMessage,
}

/// A server-side disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectRequest {
    pub session_id: String,
}

/// Active-agent listing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentsRequest {
    pub session_id: String,
}

/// Generic acknowledgment for side-effecting requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub ok: bool,
}

/// Response listing the channel's active participants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveAgentsResponse {
    #[serde(default)]
    pub agents: Vec<AgentInfo>,
}

/// Fire-and-forget datagram push carrying an ephemeral event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatagramPush {
    pub session_id: String,
    pub to: String,
    pub content: String,
}

/// Datagram poll; the reply is an [`crate::event::EventMessageResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatagramPull {
    pub session_id: String,
    #[serde(flatten)]
    pub cursor: ReceiveConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_advance_monotonic() {
        let cursor = ReceiveConfig::new(40, 4);
        let advanced = cursor.advanced_to(45, 6);
        assert_eq!(advanced.global_offset, 45);
        assert_eq!(advanced.local_offset, 6);
        assert_eq!(advanced.limit, DEFAULT_RECEIVE_LIMIT);
    }

    #[test]
    fn test_cursor_never_regresses() {
        let cursor = ReceiveConfig::new(40, 4);
        let advanced = cursor.advanced_to(12, 1);
        assert_eq!(advanced.global_offset, 40);
        assert_eq!(advanced.local_offset, 4);
    }

    #[test]
    fn test_cursor_with_limit() {
        let cursor = ReceiveConfig::new(0, 0).with_limit(50);
        assert_eq!(cursor.limit, 50);
        // advancing preserves the limit
        assert_eq!(cursor.advanced_to(5, 5).limit, 50);
    }

    #[test]
    fn test_instance_start_prefers_original_offset() {
        let state = ChannelState {
            global_offset: 40,
            local_offset: 4,
            original_global_offset: Some(36),
        };
        assert_eq!(state.instance_start(), 36);
    }

    #[test]
    fn test_instance_start_falls_back_to_global() {
        let state = ChannelState {
            global_offset: 40,
            local_offset: 4,
            original_global_offset: None,
        };
        assert_eq!(state.instance_start(), 40);
    }

    #[test]
    fn test_handshake_request_omits_absent_fields() {
        let request = HandshakeRequest {
            channel_name: None,
            channel_password: None,
            channel_id: Some("C1".to_string()),
            agent_name: "alice".to_string(),
            session_id: None,
            enable_webrtc_relay: false,
            api_key_scope: ApiKeyScope::Public,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""channelId":"C1""#));
        assert!(json.contains(r#""apiKeyScope":"public""#));
        assert!(!json.contains("channelName"));
        assert!(!json.contains("channelPassword"));
        assert!(!json.contains("sessionId"));
    }

    #[test]
    fn test_handshake_response_missing_session_id() {
        let json = r#"{"channelId":"C1","date":1000,"state":{"globalOffset":40,"localOffset":4}}"#;
        let response: HandshakeResponse = serde_json::from_str(json).unwrap();
        assert!(response.session_id.is_none());
        assert_eq!(response.state.global_offset, 40);
        assert!(response.state.original_global_offset.is_none());
    }

    #[test]
    fn test_handshake_response_full() {
        let json = r#"{"sessionId":"S1","channelId":"C1","date":1000,"state":{"globalOffset":40,"localOffset":4,"originalGlobalOffset":36}}"#;
        let response: HandshakeResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.session_id.as_deref(), Some("S1"));
        assert_eq!(response.date, 1000);
        assert_eq!(response.state.instance_start(), 36);
    }

    #[test]
    fn test_receive_request_flattens_cursor() {
        let request = ReceiveRequest {
            session_id: "S1".to_string(),
            cursor: ReceiveConfig::new(36, 0),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""sessionId":"S1""#));
        assert!(json.contains(r#""globalOffset":36"#));
        assert!(json.contains(r#""limit":20"#));
    }

    #[test]
    fn test_datagram_pull_roundtrip() {
        let pull = DatagramPull {
            session_id: "S1".to_string(),
            cursor: ReceiveConfig::new(7, 2).with_limit(5),
        };
        let json = serde_json::to_string(&pull).unwrap();
        let back: DatagramPull = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pull);
    }
}
