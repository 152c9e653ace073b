//! Request and response shapes for the control surface.

use protocol::wire::{ApiKeyScope, ReceiveConfig, DEFAULT_RECEIVE_LIMIT};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ConnectConfig;

/// One request line from a control client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", content = "params", rename_all = "camelCase")]
pub enum ControlRequest {
    /// Connect the shared agent to a channel.
    Connect(ConnectParams),
    /// Disconnect the shared agent.
    Disconnect,
    /// Fire-and-forget ephemeral push over the datagram bridge.
    UdpPush {
        to: String,
        content: String,
    },
    /// Poll the datagram bridge at a cursor.
    #[serde(rename_all = "camelCase")]
    UdpPull {
        global_offset: u64,
        local_offset: u64,
        #[serde(default = "default_limit")]
        limit: u32,
    },
}

fn default_limit() -> u32 {
    DEFAULT_RECEIVE_LIMIT
}

/// Connect parameters, mirroring [`ConnectConfig`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectParams {
    pub channel_name: Option<String>,
    pub channel_password: Option<String>,
    pub channel_id: Option<String>,
    pub agent_name: String,
    pub session_id: Option<String>,
    pub api_key_scope: ApiKeyScope,
    pub enable_webrtc_relay: bool,
    pub check_last_session: bool,
    pub receive_limit: Option<u32>,
}

impl ConnectParams {
    /// Converts into the agent's connect configuration.
    pub fn into_config(self) -> ConnectConfig {
        let mut config = ConnectConfig::new(self.agent_name);
        config.channel_name = self.channel_name;
        config.channel_password = self.channel_password;
        config.channel_id = self.channel_id;
        config.session_id = self.session_id;
        config.api_key_scope = self.api_key_scope;
        config.enable_webrtc_relay = self.enable_webrtc_relay;
        config.check_last_session = self.check_last_session;
        if let Some(limit) = self.receive_limit {
            config.receive_limit = limit;
        }
        config
    }
}

impl ControlRequest {
    /// The cursor of a `udpPull` request.
    pub fn pull_cursor(&self) -> Option<ReceiveConfig> {
        match self {
            ControlRequest::UdpPull {
                global_offset,
                local_offset,
                limit,
            } => Some(ReceiveConfig::new(*global_offset, *local_offset).with_limit(*limit)),
            _ => None,
        }
    }
}

/// Response status marker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ControlStatus {
    Ok,
    Error,
}

/// One response line to a control client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlResponse {
    pub status: ControlStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ControlResponse {
    /// A success response, optionally carrying data.
    pub fn ok(data: Option<Value>) -> Self {
        Self {
            status: ControlStatus::Ok,
            data,
            message: None,
        }
    }

    /// An error response with a human-readable message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ControlStatus::Error,
            data: None,
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_request_wire_shape() {
        let json = r#"{"op":"connect","params":{"channelName":"room-1","channelPassword":"pw","agentName":"alice"}}"#;
        let request: ControlRequest = serde_json::from_str(json).unwrap();
        match request {
            ControlRequest::Connect(params) => {
                assert_eq!(params.agent_name, "alice");
                assert_eq!(params.channel_name.as_deref(), Some("room-1"));
                assert!(!params.check_last_session);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_disconnect_request_wire_shape() {
        let request: ControlRequest = serde_json::from_str(r#"{"op":"disconnect"}"#).unwrap();
        assert_eq!(request, ControlRequest::Disconnect);
    }

    #[test]
    fn test_udp_push_request_wire_shape() {
        let json = r#"{"op":"udpPush","params":{"to":"bob","content":"ping"}}"#;
        let request: ControlRequest = serde_json::from_str(json).unwrap();
        assert_eq!(
            request,
            ControlRequest::UdpPush {
                to: "bob".to_string(),
                content: "ping".to_string()
            }
        );
    }

    #[test]
    fn test_udp_pull_request_defaults_limit() {
        let json = r#"{"op":"udpPull","params":{"globalOffset":7,"localOffset":2}}"#;
        let request: ControlRequest = serde_json::from_str(json).unwrap();
        let cursor = request.pull_cursor().unwrap();
        assert_eq!(cursor.global_offset, 7);
        assert_eq!(cursor.local_offset, 2);
        assert_eq!(cursor.limit, DEFAULT_RECEIVE_LIMIT);
    }

    #[test]
    fn test_connect_params_into_config() {
        let params = ConnectParams {
            channel_id: Some("C1".to_string()),
            agent_name: "bob".to_string(),
            check_last_session: true,
            receive_limit: Some(50),
            ..Default::default()
        };
        let config = params.into_config();
        assert_eq!(config.agent_name, "bob");
        assert_eq!(config.channel_id.as_deref(), Some("C1"));
        assert!(config.check_last_session);
        assert_eq!(config.receive_limit, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ok_response_shape() {
        let response = ControlResponse::ok(Some(serde_json::json!({"sessionId": "S1"})));
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""status":"ok""#));
        assert!(json.contains(r#""sessionId":"S1""#));
        assert!(!json.contains("message"));
    }

    #[test]
    fn test_error_response_shape() {
        let response = ControlResponse::error("not connected");
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""status":"error""#));
        assert!(json.contains(r#""message":"not connected""#));
        assert!(!json.contains("data"));
    }

    #[test]
    fn test_response_roundtrip() {
        let response = ControlResponse::error("boom");
        let back: ControlResponse =
            serde_json::from_str(&serde_json::to_string(&response).unwrap()).unwrap();
        assert_eq!(back, response);
    }
}
