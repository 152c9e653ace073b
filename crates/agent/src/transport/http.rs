//! HTTP implementation of the broker control path.
//!
//! Each operation is a JSON POST to a fixed endpoint under the broker
//! base URL. Receive uses a longer deadline so the broker can
//! long-poll; every other operation uses the request deadline.

use std::time::Duration;

use protocol::event::{AgentInfo, EventMessageResult};
use protocol::wire::{
    Ack, ActiveAgentsResponse, AgentsRequest, DisconnectRequest, HandshakeRequest,
    HandshakeResponse, ReceiveConfig, ReceiveRequest, SendRequest,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use super::{BoxFuture, Transport, TransportError, TransportResult};

/// Configuration for the HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Base URL of the broker control path.
    pub base_url: String,
    /// Deadline for side-effecting requests.
    pub request_timeout: Duration,
    /// Deadline for long-poll receive requests.
    pub receive_timeout: Duration,
    /// Developer API key sent as `x-api-key` with every request.
    pub api_key: Option<String>,
}

impl HttpTransportConfig {
    /// Creates a configuration with default deadlines.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(10),
            receive_timeout: Duration::from_secs(40),
            api_key: None,
        }
    }

    /// Sets the side-effecting request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the long-poll receive deadline.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Sets the developer API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

/// HTTP control-path transport backed by `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    /// Creates a transport, validating the base URL.
    pub fn new(config: HttpTransportConfig) -> TransportResult<Self> {
        Url::parse(&config.base_url)
            .map_err(|e| TransportError::Request(format!("invalid broker url: {}", e)))?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// Builds the endpoint URL for an operation path.
    fn endpoint(&self, path: &str) -> TransportResult<Url> {
        let raw = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
        Url::parse(&raw).map_err(|e| TransportError::Request(format!("invalid endpoint: {}", e)))
    }

    async fn post_json<B, T>(&self, path: &str, body: &B, timeout: Duration) -> TransportResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let mut request = self.client.post(url).timeout(timeout).json(body);
        if let Some(api_key) = &self.config.api_key {
            request = request.header("x-api-key", api_key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(path.to_string())
            } else {
                TransportError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Rejected {
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| TransportError::Encoding(e.to_string()))
    }
}

impl Transport for HttpTransport {
    fn handshake(
        &self,
        request: HandshakeRequest,
    ) -> BoxFuture<'_, TransportResult<HandshakeResponse>> {
        Box::pin(async move {
            self.post_json("channel/connect", &request, self.config.request_timeout)
                .await
        })
    }

    fn disconnect(&self, session_id: &str) -> BoxFuture<'_, TransportResult<bool>> {
        let request = DisconnectRequest {
            session_id: session_id.to_string(),
        };
        Box::pin(async move {
            let ack: Ack = self
                .post_json("channel/disconnect", &request, self.config.request_timeout)
                .await?;
            Ok(ack.ok)
        })
    }

    fn send(&self, request: SendRequest) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            let _ack: Ack = self
                .post_json("channel/send", &request, self.config.request_timeout)
                .await?;
            Ok(())
        })
    }

    fn receive(
        &self,
        session_id: &str,
        cursor: ReceiveConfig,
    ) -> BoxFuture<'_, TransportResult<EventMessageResult>> {
        let request = ReceiveRequest {
            session_id: session_id.to_string(),
            cursor,
        };
        Box::pin(async move {
            self.post_json("channel/receive", &request, self.config.receive_timeout)
                .await
        })
    }

    fn active_agents(&self, session_id: &str) -> BoxFuture<'_, TransportResult<Vec<AgentInfo>>> {
        let request = AgentsRequest {
            session_id: session_id.to_string(),
        };
        Box::pin(async move {
            let response: ActiveAgentsResponse = self
                .post_json("channel/agents", &request, self.config.request_timeout)
                .await?;
            Ok(response.agents)
        })
    }
}
