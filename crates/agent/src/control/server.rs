//! Control server: accept loop and per-client workers.

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use super::messages::{ControlRequest, ControlResponse};
use crate::manager::ChannelAgent;

/// Listens on a loopback TCP socket and serves control clients.
pub struct ControlServer {
    listener: TcpListener,
    agent: ChannelAgent,
}

impl ControlServer {
    /// Binds the control endpoint. The caller is expected to pass a
    /// loopback address; anything else is allowed but warned about,
    /// since the endpoint has no authentication of its own.
    pub async fn bind(addr: SocketAddr, agent: ChannelAgent) -> io::Result<Self> {
        if !addr.ip().is_loopback() {
            tracing::warn!(%addr, "control endpoint bound to a non-loopback address");
        }
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "control endpoint listening");
        Ok(Self { listener, agent })
    }

    /// The bound address (useful with port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop; runs until the task is dropped. Each client gets
    /// its own worker.
    pub async fn run(self) -> io::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            tracing::debug!(%peer, "control client connected");
            let agent = self.agent.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_client(stream, agent).await {
                    tracing::debug!(%peer, error = %e, "control client ended with error");
                }
                tracing::debug!(%peer, "control client disconnected");
            });
        }
    }
}

/// Reads request lines until the client hangs up, answering each with
/// exactly one response line.
async fn serve_client(stream: TcpStream, agent: ChannelAgent) -> io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ControlRequest>(trimmed) {
            Ok(request) => dispatch(&agent, request).await,
            Err(e) => ControlResponse::error(format!("invalid request: {}", e)),
        };

        let mut json = serde_json::to_string(&response)
            .unwrap_or_else(|e| format!(r#"{{"status":"error","message":"{}"}}"#, e));
        json.push('\n');
        write_half.write_all(json.as_bytes()).await?;
        write_half.flush().await?;
    }
}

/// Maps one control request onto the shared agent.
async fn dispatch(agent: &ChannelAgent, request: ControlRequest) -> ControlResponse {
    match request {
        ControlRequest::Connect(params) => match agent.connect(params.into_config()).await {
            Ok(()) => {
                let data = agent
                    .session_summary()
                    .await
                    .and_then(|summary| serde_json::to_value(summary).ok());
                ControlResponse::ok(data)
            }
            Err(e) => ControlResponse::error(e.to_string()),
        },
        ControlRequest::Disconnect => match agent.disconnect().await {
            Ok(ok) => ControlResponse::ok(Some(serde_json::json!({ "ok": ok }))),
            Err(e) => ControlResponse::error(e.to_string()),
        },
        ControlRequest::UdpPush { to, content } => match agent.udp_push(&to, &content).await {
            Ok(()) => ControlResponse::ok(None),
            Err(e) => ControlResponse::error(e.to_string()),
        },
        request @ ControlRequest::UdpPull { .. } => {
            // cursor always present for this variant
            let Some(cursor) = request.pull_cursor() else {
                return ControlResponse::error("missing cursor");
            };
            match agent.udp_pull(cursor).await {
                Ok(result) => match serde_json::to_value(&result) {
                    Ok(data) => ControlResponse::ok(Some(data)),
                    Err(e) => ControlResponse::error(e.to_string()),
                },
                Err(e) => ControlResponse::error(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::messages::ControlStatus;
    use crate::testing::{MemorySessionStore, ScriptedTransport};
    use tokio::io::{AsyncBufReadExt, BufReader};

    async fn start_server() -> (SocketAddr, ChannelAgent, std::sync::Arc<ScriptedTransport>) {
        let transport = ScriptedTransport::new();
        let agent = ChannelAgent::new(transport.clone())
            .with_session_store(MemorySessionStore::new());
        let server = ControlServer::bind("127.0.0.1:0".parse().unwrap(), agent.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        (addr, agent, transport)
    }

    async fn roundtrip(stream: &mut TcpStream, request: &str) -> ControlResponse {
        use tokio::io::AsyncWriteExt;
        stream
            .write_all(format!("{}\n", request).as_bytes())
            .await
            .unwrap();
        let (read_half, _) = stream.split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(line.trim()).unwrap()
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_over_control() {
        let (addr, agent, _transport) = start_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let response = roundtrip(
            &mut stream,
            r#"{"op":"connect","params":{"channelName":"room-1","channelPassword":"pw","agentName":"alice"}}"#,
        )
        .await;
        assert_eq!(response.status, ControlStatus::Ok);
        let data = response.data.unwrap();
        assert_eq!(data["sessionId"], "S1");
        assert_eq!(data["channelId"], "C1");
        assert!(agent.is_ready());

        let response = roundtrip(&mut stream, r#"{"op":"disconnect"}"#).await;
        assert_eq!(response.status, ControlStatus::Ok);
        assert!(!agent.is_ready());
    }

    #[tokio::test]
    async fn test_invalid_json_yields_error_line() {
        let (addr, _agent, _transport) = start_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let response = roundtrip(&mut stream, "{not json").await;
        assert_eq!(response.status, ControlStatus::Error);
        assert!(response.message.unwrap().contains("invalid request"));
    }

    #[tokio::test]
    async fn test_udp_push_without_bridge_reports_error() {
        let (addr, _agent, _transport) = start_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        // connect first so the push reaches the bridge check
        roundtrip(
            &mut stream,
            r#"{"op":"connect","params":{"channelName":"room-1","channelPassword":"pw","agentName":"alice"}}"#,
        )
        .await;

        let response = roundtrip(
            &mut stream,
            r#"{"op":"udpPush","params":{"to":"bob","content":"ping"}}"#,
        )
        .await;
        assert_eq!(response.status, ControlStatus::Error);
        assert!(response.message.unwrap().contains("datagram bridge"));
    }

    #[tokio::test]
    async fn test_clients_share_one_agent() {
        let (addr, _agent, _transport) = start_server().await;
        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();

        let response = roundtrip(
            &mut first,
            r#"{"op":"connect","params":{"channelName":"room-1","channelPassword":"pw","agentName":"alice"}}"#,
        )
        .await;
        assert_eq!(response.status, ControlStatus::Ok);

        // the second client sees the session held by the first
        let response = roundtrip(
            &mut second,
            r#"{"op":"connect","params":{"channelName":"room-1","channelPassword":"pw","agentName":"bob"}}"#,
        )
        .await;
        assert_eq!(response.status, ControlStatus::Error);
        assert!(response.message.unwrap().contains("already connected"));
    }
}
