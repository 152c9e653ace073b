//! Datagram bridge for the low-latency path.
//!
//! The bridge speaks the same JSON shapes as the control path over
//! UDP: `udpPush` is fire-and-forget, `udpPull` polls for a batch in
//! the same shape as the control receive. Both sides accept loss; the
//! durable log on the control path remains the source of truth.

use std::time::Duration;

use bytes::BytesMut;
use protocol::event::EventMessageResult;
use protocol::wire::{DatagramPull, DatagramPush};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;

use super::{TransportError, TransportResult};

/// Largest datagram the bridge will send or accept.
const MAX_DATAGRAM_LEN: usize = 65_507;

/// Requests carried over the datagram bridge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum DatagramRequest {
    UdpPush(DatagramPush),
    UdpPull(DatagramPull),
}

/// Configuration for the datagram bridge.
#[derive(Debug, Clone)]
pub struct UdpBridgeConfig {
    /// Address of the broker datagram endpoint.
    pub broker_addr: String,
    /// Deadline for a pull round-trip.
    pub pull_timeout: Duration,
}

impl UdpBridgeConfig {
    /// Creates a configuration with the default pull deadline.
    pub fn new(broker_addr: impl Into<String>) -> Self {
        Self {
            broker_addr: broker_addr.into(),
            pull_timeout: Duration::from_secs(5),
        }
    }

    /// Sets the pull deadline.
    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }
}

/// A connected datagram bridge to the broker.
pub struct UdpBridge {
    socket: UdpSocket,
    pull_timeout: Duration,
}

impl UdpBridge {
    /// Binds a local socket and connects it to the broker endpoint.
    pub async fn connect(config: UdpBridgeConfig) -> TransportResult<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| TransportError::Request(format!("failed to bind socket: {}", e)))?;
        socket
            .connect(&config.broker_addr)
            .await
            .map_err(|e| TransportError::Unavailable(format!("datagram endpoint: {}", e)))?;
        Ok(Self {
            socket,
            pull_timeout: config.pull_timeout,
        })
    }

    /// Fire-and-forget push of an ephemeral event. Errors only on
    /// local send failure; delivery is best-effort by design of the
    /// path.
    pub async fn push(&self, push: DatagramPush) -> TransportResult<()> {
        let payload = serde_json::to_vec(&DatagramRequest::UdpPush(push))?;
        if payload.len() > MAX_DATAGRAM_LEN {
            return Err(TransportError::Encoding(format!(
                "datagram too large: {} bytes",
                payload.len()
            )));
        }
        self.socket
            .send(&payload)
            .await
            .map_err(|e| TransportError::Request(format!("udp send failed: {}", e)))?;
        Ok(())
    }

    /// Polls the broker for a batch. Same result shape as the control
    /// receive; the caller advances its cursor on success only.
    pub async fn pull(&self, pull: DatagramPull) -> TransportResult<EventMessageResult> {
        let payload = serde_json::to_vec(&DatagramRequest::UdpPull(pull))?;
        self.socket
            .send(&payload)
            .await
            .map_err(|e| TransportError::Request(format!("udp send failed: {}", e)))?;

        let mut buf = BytesMut::zeroed(MAX_DATAGRAM_LEN);
        let len = tokio::time::timeout(self.pull_timeout, self.socket.recv(&mut buf))
            .await
            .map_err(|_| TransportError::Timeout("udp pull".to_string()))?
            .map_err(|e| TransportError::Request(format!("udp receive failed: {}", e)))?;

        serde_json::from_slice(&buf[..len])
            .map_err(|e| TransportError::Encoding(format!("invalid pull response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::wire::ReceiveConfig;

    fn sample_push() -> DatagramPush {
        DatagramPush {
            session_id: "S1".to_string(),
            to: "bob".to_string(),
            content: "ping".to_string(),
        }
    }

    #[test]
    fn test_datagram_request_wire_shape() {
        let json = serde_json::to_string(&DatagramRequest::UdpPush(sample_push())).unwrap();
        assert!(json.contains(r#""op":"udpPush""#));
        assert!(json.contains(r#""sessionId":"S1""#));

        let pull = DatagramRequest::UdpPull(DatagramPull {
            session_id: "S1".to_string(),
            cursor: ReceiveConfig::new(3, 1),
        });
        let json = serde_json::to_string(&pull).unwrap();
        assert!(json.contains(r#""op":"udpPull""#));
        assert!(json.contains(r#""globalOffset":3"#));

        let back: DatagramRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pull);
    }

    #[tokio::test]
    async fn test_push_reaches_broker() {
        let broker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let broker_addr = broker.local_addr().unwrap();

        let bridge = UdpBridge::connect(UdpBridgeConfig::new(broker_addr.to_string()))
            .await
            .unwrap();
        bridge.push(sample_push()).await.unwrap();

        let mut buf = vec![0u8; 2048];
        let (len, _) = broker.recv_from(&mut buf).await.unwrap();
        let request: DatagramRequest = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(request, DatagramRequest::UdpPush(sample_push()));
    }

    #[tokio::test]
    async fn test_pull_roundtrip() {
        let broker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let broker_addr = broker.local_addr().unwrap();

        // one-shot broker answering any pull with an empty batch
        tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            let (len, src) = broker.recv_from(&mut buf).await.unwrap();
            let request: DatagramRequest = serde_json::from_slice(&buf[..len]).unwrap();
            assert!(matches!(request, DatagramRequest::UdpPull(_)));

            let result = EventMessageResult {
                next_global_offset: 7,
                next_local_offset: 2,
                ..Default::default()
            };
            let payload = serde_json::to_vec(&result).unwrap();
            broker.send_to(&payload, src).await.unwrap();
        });

        let bridge = UdpBridge::connect(UdpBridgeConfig::new(broker_addr.to_string()))
            .await
            .unwrap();
        let result = bridge
            .pull(DatagramPull {
                session_id: "S1".to_string(),
                cursor: ReceiveConfig::new(0, 0),
            })
            .await
            .unwrap();
        assert_eq!(result.next_global_offset, 7);
        assert_eq!(result.next_local_offset, 2);
    }

    #[tokio::test]
    async fn test_pull_times_out_without_reply() {
        let broker = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let broker_addr = broker.local_addr().unwrap();

        let bridge = UdpBridge::connect(
            UdpBridgeConfig::new(broker_addr.to_string())
                .with_pull_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();

        let result = bridge
            .pull(DatagramPull {
                session_id: "S1".to_string(),
                cursor: ReceiveConfig::new(0, 0),
            })
            .await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }
}
