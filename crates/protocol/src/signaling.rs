//! WebRTC signaling payloads carried inside WEBRTC_SIGNALING events.
//!
//! The core routes these envelopes between agents; it never parses SDP
//! or candidate strings.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Signaling message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
    Ice,
}

/// An ICE candidate as relayed between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

/// The JSON content of a WEBRTC_SIGNALING event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingPayload {
    pub kind: SignalKind,
    pub stream_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice_candidate: Option<IceCandidate>,
}

impl SignalingPayload {
    /// Builds an offer payload for a stream.
    pub fn offer(stream_id: impl Into<String>, sdp: impl Into<String>) -> Self {
        Self {
            kind: SignalKind::Offer,
            stream_id: stream_id.into(),
            sdp: Some(sdp.into()),
            ice_candidate: None,
        }
    }

    /// Builds an answer payload for a stream.
    pub fn answer(stream_id: impl Into<String>, sdp: impl Into<String>) -> Self {
        Self {
            kind: SignalKind::Answer,
            stream_id: stream_id.into(),
            sdp: Some(sdp.into()),
            ice_candidate: None,
        }
    }

    /// Builds an ICE payload for a stream.
    pub fn ice(stream_id: impl Into<String>, candidate: IceCandidate) -> Self {
        Self {
            kind: SignalKind::Ice,
            stream_id: stream_id.into(),
            sdp: None,
            ice_candidate: Some(candidate),
        }
    }

    /// Serializes to event content.
    pub fn to_content(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses event content, enforcing the wire contract.
    ///
    /// Malformed envelopes (missing stream id, an offer without SDP, an
    /// ICE message without a candidate) are protocol violations; the
    /// router logs and drops them.
    pub fn from_content(content: &str) -> Result<Self> {
        let payload: SignalingPayload = serde_json::from_str(content)
            .map_err(|e| ProtocolError::Violation(format!("malformed signaling payload: {}", e)))?;

        if payload.stream_id.is_empty() {
            return Err(ProtocolError::Violation(
                "signaling payload without streamId".to_string(),
            ));
        }
        match payload.kind {
            SignalKind::Offer | SignalKind::Answer if payload.sdp.is_none() => {
                Err(ProtocolError::Violation(format!(
                    "{:?} payload without sdp",
                    payload.kind
                )))
            }
            SignalKind::Ice if payload.ice_candidate.is_none() => Err(ProtocolError::Violation(
                "ice payload without candidate".to_string(),
            )),
            _ => Ok(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_wire_shape() {
        let payload = SignalingPayload::offer("v1", "v=0\r\n...");
        let json = payload.to_content().unwrap();
        assert!(json.contains(r#""kind":"offer""#));
        assert!(json.contains(r#""streamId":"v1""#));
        assert!(json.contains(r#""sdp":"v=0\r\n...""#));
        assert!(!json.contains("iceCandidate"));
    }

    #[test]
    fn test_ice_wire_shape() {
        let payload = SignalingPayload::ice(
            "v1",
            IceCandidate {
                candidate: "candidate:1 1 UDP 2130706431 ...".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            },
        );
        let json = payload.to_content().unwrap();
        assert!(json.contains(r#""kind":"ice""#));
        assert!(json.contains(r#""sdpMid":"0""#));
        assert!(json.contains(r#""sdpMLineIndex":0"#));
    }

    #[test]
    fn test_roundtrip() {
        let payload = SignalingPayload::answer("stream-7", "sdp-answer");
        let back = SignalingPayload::from_content(&payload.to_content().unwrap()).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_missing_stream_id_is_violation() {
        let result = SignalingPayload::from_content(r#"{"kind":"offer","streamId":"","sdp":"x"}"#);
        assert!(matches!(result, Err(ProtocolError::Violation(_))));
    }

    #[test]
    fn test_offer_without_sdp_is_violation() {
        let result = SignalingPayload::from_content(r#"{"kind":"offer","streamId":"v1"}"#);
        assert!(matches!(result, Err(ProtocolError::Violation(_))));
    }

    #[test]
    fn test_ice_without_candidate_is_violation() {
        let result = SignalingPayload::from_content(r#"{"kind":"ice","streamId":"v1"}"#);
        assert!(matches!(result, Err(ProtocolError::Violation(_))));
    }

    #[test]
    fn test_garbage_is_violation() {
        let result = SignalingPayload::from_content("{not json");
        assert!(matches!(result, Err(ProtocolError::Violation(_))));
    }

    #[test]
    fn test_ice_candidate_optional_fields_omitted() {
        let payload = SignalingPayload::ice(
            "v1",
            IceCandidate {
                candidate: "candidate:1".to_string(),
                sdp_mid: None,
                sdp_mline_index: None,
            },
        );
        let json = payload.to_content().unwrap();
        assert!(!json.contains("sdpMid"));
        assert!(!json.contains("sdpMLineIndex"));
    }
}
