//! The in-band password handshake.
//!
//! An agent that joined with only a channel id broadcasts a
//! PASSWORD_REQUEST carrying its session RSA public key. Any member
//! holding the credentials may answer with a PASSWORD_REPLY whose
//! content is the `(channelName, channelPassword)` pair wrapped to the
//! requester's key; the channel-layer `encrypted` flag stays false
//! because the payload is already end-to-end encrypted to exactly one
//! reader. The requester unwraps the reply, installs the credentials,
//! and derives the same channel secret as every other member.
//!
//! Whether to answer a request is a policy decision of the embedding
//! application; the default policy replies whenever credentials are
//! held.

use std::sync::{Arc, RwLock};

use protocol::event::{EventMessage, BROADCAST};
use protocol::keys::{wrap_credentials, PasswordRequestPayload};
use protocol::EventType;

use crate::error::Result;
use crate::outbox::Outbox;
use crate::session::Session;

/// Decides whether a PASSWORD_REQUEST from `requester` receives a
/// reply. The requester's public key PEM is provided so policies can
/// pin or fingerprint keys.
pub trait PasswordRequestPolicy: Send + Sync {
    fn allow(&self, channel_id: &str, requester: &str, requester_key_pem: &str) -> bool;
}

impl<F> PasswordRequestPolicy for F
where
    F: Fn(&str, &str, &str) -> bool + Send + Sync,
{
    fn allow(&self, channel_id: &str, requester: &str, requester_key_pem: &str) -> bool {
        self(channel_id, requester, requester_key_pem)
    }
}

/// Runs the request/reply/consume paths of the password handshake for
/// one session.
pub struct PasswordExchange {
    session: Arc<Session>,
    outbox: Outbox,
    policy: RwLock<Option<Arc<dyn PasswordRequestPolicy>>>,
}

impl PasswordExchange {
    pub(crate) fn new(session: Arc<Session>, outbox: Outbox) -> Self {
        Self {
            session,
            outbox,
            policy: RwLock::new(None),
        }
    }

    /// Installs the reply policy. Without one, requests are answered
    /// whenever credentials are held.
    pub fn set_policy(&self, policy: Arc<dyn PasswordRequestPolicy>) {
        if let Ok(mut slot) = self.policy.write() {
            *slot = Some(policy);
        }
    }

    /// Broadcasts a PASSWORD_REQUEST carrying this session's public
    /// key. Non-blocking with respect to the reply.
    pub async fn broadcast_request(&self) -> Result<()> {
        let payload = PasswordRequestPayload {
            public_key_pem: self.session.key_pair().public_key_pem()?,
        };
        let event = self.outbox.make_event(
            EventType::PasswordRequest,
            BROADCAST,
            serde_json::to_string(&payload).map_err(protocol::ProtocolError::from)?,
        );
        self.outbox.send(event).await?;
        tracing::debug!(
            channel_id = %self.session.channel_id,
            "broadcast password request"
        );
        Ok(())
    }

    /// Respond path: answers another agent's PASSWORD_REQUEST when
    /// credentials are held and the policy allows it. Never fails out;
    /// problems are logged and the request is ignored.
    pub async fn handle_request(&self, event: &EventMessage) {
        if event.from == self.session.agent_name {
            return;
        }

        let payload: PasswordRequestPayload = match serde_json::from_str(&event.content) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(from = %event.from, error = %e, "malformed password request dropped");
                return;
            }
        };

        // No credentials: silently do not reply.
        let Some(credentials) = self.session.credentials().await else {
            return;
        };

        let allowed = {
            let policy = self.policy.read().ok().and_then(|slot| slot.clone());
            match policy {
                Some(policy) => policy.allow(
                    &self.session.channel_id,
                    &event.from,
                    &payload.public_key_pem,
                ),
                None => true,
            }
        };
        if !allowed {
            tracing::info!(requester = %event.from, "password request denied by policy");
            return;
        }

        let wrapped = match wrap_credentials(&payload.public_key_pem, &credentials) {
            Ok(wrapped) => wrapped,
            Err(e) => {
                tracing::warn!(requester = %event.from, error = %e, "failed to wrap credentials");
                return;
            }
        };

        let reply = self
            .outbox
            .make_event(EventType::PasswordReply, event.from.clone(), wrapped);
        if let Err(e) = self.outbox.send(reply).await {
            tracing::warn!(requester = %event.from, error = %e, "failed to send password reply");
        } else {
            tracing::info!(requester = %event.from, "answered password request");
        }
    }

    /// Consume path: unwraps a PASSWORD_REPLY addressed to this agent
    /// and installs the credentials if still missing. RSA failures are
    /// logged and ignored; a reply wrapped to a stale key from another
    /// member is expected noise.
    pub async fn handle_reply(&self, event: &EventMessage) {
        if !event.addressed_to(&self.session.agent_name) || event.is_broadcast() {
            return;
        }
        if self.session.has_secret().await {
            return;
        }

        let credentials = match self.session.key_pair().unwrap_credentials(&event.content) {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::warn!(from = %event.from, error = %e, "password reply ignored");
                return;
            }
        };

        match self.session.install_credentials(credentials).await {
            Ok(true) => {
                tracing::info!(from = %event.from, "channel secret obtained via password handshake");
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, "failed to derive channel secret from reply");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::keys::{AgentKeyPair, ChannelCredentials};

    use crate::testing::{make_session, RecordingTransport};

    fn make_exchange(
        session: Arc<Session>,
        transport: Arc<RecordingTransport>,
    ) -> PasswordExchange {
        let outbox = Outbox::new(
            transport,
            session.session_id.clone(),
            session.agent_name.clone(),
        );
        PasswordExchange::new(session, outbox)
    }

    fn credentials() -> ChannelCredentials {
        ChannelCredentials {
            channel_name: "r".to_string(),
            channel_password: "p".to_string(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_request_shape() {
        let session = make_session("bob");
        let transport = RecordingTransport::new();
        let exchange = make_exchange(session, transport.clone());

        exchange.broadcast_request().await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event_type, EventType::PasswordRequest);
        assert_eq!(sent[0].to, BROADCAST);
        assert!(!sent[0].encrypted);
        let payload: PasswordRequestPayload = serde_json::from_str(&sent[0].content).unwrap();
        assert!(payload.public_key_pem.contains("BEGIN PUBLIC KEY"));
    }

    #[tokio::test]
    async fn test_request_and_reply_complete_the_exchange() {
        // A holds credentials; B knows only the channel id.
        let session_a = make_session("alice");
        session_a.install_credentials(credentials()).await.unwrap();
        let transport_a = RecordingTransport::new();
        let exchange_a = make_exchange(session_a.clone(), transport_a.clone());

        let session_b = make_session("bob");
        let transport_b = RecordingTransport::new();
        let exchange_b = make_exchange(session_b.clone(), transport_b.clone());

        // B broadcasts; A receives the request (stamped after A's connect)
        exchange_b.broadcast_request().await.unwrap();
        let mut request = transport_b.sent().remove(0);
        request.date = 2000;
        exchange_a.handle_request(&request).await;

        // A produced a reply addressed to B
        let mut reply = transport_a.sent().remove(0);
        assert_eq!(reply.event_type, EventType::PasswordReply);
        assert_eq!(reply.to, "bob");
        assert!(!reply.encrypted);

        // B consumes the reply and derives the same secret as A
        reply.date = 2001;
        exchange_b.handle_reply(&reply).await;
        assert!(session_b.has_secret().await);
        assert_eq!(
            session_b.secret().await.unwrap().as_bytes(),
            session_a.secret().await.unwrap().as_bytes()
        );
    }

    #[tokio::test]
    async fn test_request_without_credentials_is_ignored() {
        let session_a = make_session("alice");
        let transport_a = RecordingTransport::new();
        let exchange_a = make_exchange(session_a, transport_a.clone());

        let session_b = make_session("bob");
        let transport_b = RecordingTransport::new();
        let exchange_b = make_exchange(session_b, transport_b.clone());

        exchange_b.broadcast_request().await.unwrap();
        let request = transport_b.sent().remove(0);
        exchange_a.handle_request(&request).await;

        assert!(transport_a.sent().is_empty());
    }

    #[tokio::test]
    async fn test_own_request_is_not_answered() {
        let session = make_session("alice");
        session.install_credentials(credentials()).await.unwrap();
        let transport = RecordingTransport::new();
        let exchange = make_exchange(session, transport.clone());

        exchange.broadcast_request().await.unwrap();
        let request = transport.sent().remove(0);
        exchange.handle_request(&request).await;

        // only the original broadcast, no self-reply
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_policy_denies_reply() {
        let session = make_session("alice");
        session.install_credentials(credentials()).await.unwrap();
        let transport = RecordingTransport::new();
        let exchange = make_exchange(session, transport.clone());
        exchange.set_policy(Arc::new(|_: &str, _: &str, _: &str| false));

        let requester = make_session("bob");
        let request = EventMessage {
            id: "ev-1".to_string(),
            event_type: EventType::PasswordRequest,
            from: "bob".to_string(),
            to: BROADCAST.to_string(),
            date: 2000,
            content: serde_json::to_string(&PasswordRequestPayload {
                public_key_pem: requester.key_pair().public_key_pem().unwrap(),
            })
            .unwrap(),
            encrypted: false,
            custom_type: None,
        };
        exchange.handle_request(&request).await;
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_request_is_dropped() {
        let session = make_session("alice");
        session.install_credentials(credentials()).await.unwrap();
        let transport = RecordingTransport::new();
        let exchange = make_exchange(session, transport.clone());

        let request = EventMessage {
            id: "ev-1".to_string(),
            event_type: EventType::PasswordRequest,
            from: "bob".to_string(),
            to: BROADCAST.to_string(),
            date: 2000,
            content: "{broken".to_string(),
            encrypted: false,
            custom_type: None,
        };
        exchange.handle_request(&request).await;
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_reply_for_other_agent_is_ignored() {
        let session = make_session("bob");
        let transport = RecordingTransport::new();
        let exchange = make_exchange(session.clone(), transport);

        let reply = EventMessage {
            id: "ev-1".to_string(),
            event_type: EventType::PasswordReply,
            from: "alice".to_string(),
            to: "carol".to_string(),
            date: 2000,
            content: "irrelevant".to_string(),
            encrypted: false,
            custom_type: None,
        };
        exchange.handle_reply(&reply).await;
        assert!(!session.has_secret().await);
    }

    #[tokio::test]
    async fn test_undecryptable_reply_is_ignored() {
        let session = make_session("bob");
        let transport = RecordingTransport::new();
        let exchange = make_exchange(session.clone(), transport);

        // wrapped to a different key pair
        let other = AgentKeyPair::generate().unwrap();
        let wrapped = wrap_credentials(&other.public_key_pem().unwrap(), &credentials()).unwrap();

        let reply = EventMessage {
            id: "ev-1".to_string(),
            event_type: EventType::PasswordReply,
            from: "alice".to_string(),
            to: "bob".to_string(),
            date: 2000,
            content: wrapped,
            encrypted: false,
            custom_type: None,
        };
        exchange.handle_reply(&reply).await;
        assert!(!session.has_secret().await);
    }
}
