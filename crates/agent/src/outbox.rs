//! Outbound event construction shared by the agent's components.

use std::sync::Arc;

use protocol::event::{EventMessage, EventType};
use protocol::wire::SendRequest;
use uuid::Uuid;

use crate::transport::{Transport, TransportResult};

/// Builds and submits outbound events for one session.
///
/// The broker stamps `date` on ingress; outbound events carry zero.
#[derive(Clone)]
pub(crate) struct Outbox {
    transport: Arc<dyn Transport>,
    session_id: String,
    agent_name: String,
}

impl Outbox {
    pub fn new(transport: Arc<dyn Transport>, session_id: String, agent_name: String) -> Self {
        Self {
            transport,
            session_id,
            agent_name,
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Builds a plaintext event from the local agent.
    pub fn make_event(
        &self,
        event_type: EventType,
        to: impl Into<String>,
        content: impl Into<String>,
    ) -> EventMessage {
        EventMessage {
            id: Uuid::new_v4().to_string(),
            event_type,
            from: self.agent_name.clone(),
            to: to.into(),
            date: 0,
            content: content.into(),
            encrypted: false,
            custom_type: None,
        }
    }

    /// Submits an event through the control path.
    pub async fn send(&self, event: EventMessage) -> TransportResult<()> {
        self.transport
            .send(SendRequest {
                session_id: self.session_id.clone(),
                event,
            })
            .await
    }
}
