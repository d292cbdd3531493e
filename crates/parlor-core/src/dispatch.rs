//! Single entry point from the transport into the core.

use crate::coordinator::{SessionCoordinator, SessionError, DEFAULT_GRACE_PERIOD};
use crate::history::{HistoryStore, DEFAULT_MAX_MESSAGES_PER_THREAD};
use crate::registry::ConnectionRegistry;
use crate::router::{MessageRouter, RouterError};
use parlor_protocol::{ClientEvent, PrivateHistory, ServerEvent};
use parlor_transport::{ConnectionId, Transport};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Core configuration.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Delay before an identity with no tabs is declared offline.
    pub grace_period: Duration,
    /// Cap on messages kept per private thread. Zero keeps everything.
    pub max_messages_per_thread: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            max_messages_per_thread: DEFAULT_MAX_MESSAGES_PER_THREAD,
        }
    }
}

/// Who sent an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    pub connection_id: ConnectionId,
    /// Verified identity, never taken from the event body.
    pub username: String,
}

impl ConnectionContext {
    /// Create a context for an authenticated connection.
    #[must_use]
    pub fn new(connection_id: ConnectionId, username: impl Into<String>) -> Self {
        Self {
            connection_id,
            username: username.into(),
        }
    }
}

/// Everything the transport can report about a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// The connection finished authenticating.
    Connect,
    /// The connection is gone.
    Disconnect { reason: String },
    /// The client sent an event.
    Client(ClientEvent),
}

/// Dispatch errors. Each is also reported to the originating connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Owns the core components and routes inbound events to them.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    history: Arc<HistoryStore>,
    coordinator: SessionCoordinator,
    router: MessageRouter,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    /// Wire up the core over a transport.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: CoreConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let history = Arc::new(HistoryStore::with_limit(config.max_messages_per_thread));
        let coordinator = SessionCoordinator::with_grace_period(
            Arc::clone(&registry),
            Arc::clone(&transport),
            config.grace_period,
        );
        let router = MessageRouter::new(
            Arc::clone(&registry),
            Arc::clone(&history),
            Arc::clone(&transport),
        );

        Self {
            registry,
            history,
            coordinator,
            router,
            transport,
        }
    }

    /// Handle one inbound event.
    ///
    /// # Errors
    ///
    /// Returns the failure after sending it to the originating connection as
    /// an `error` event. No state has changed in that case.
    pub fn dispatch(
        &self,
        ctx: &ConnectionContext,
        event: InboundEvent,
    ) -> Result<(), DispatchError> {
        let result = match event {
            InboundEvent::Connect => {
                self.coordinator.connect(&ctx.username, &ctx.connection_id);
                Ok(())
            }
            InboundEvent::Disconnect { reason } => {
                debug!(
                    username = %ctx.username,
                    connection = %ctx.connection_id,
                    reason = %reason,
                    "Disconnected"
                );
                self.coordinator.disconnect(&ctx.username, &ctx.connection_id);
                Ok(())
            }
            InboundEvent::Client(event) => {
                trace!(connection = %ctx.connection_id, event = event.name(), "Client event");
                self.handle_client(ctx, event)
            }
        };

        if let Err(e) = &result {
            if matches!(e, DispatchError::Router(RouterError::InvalidKind(_))) {
                warn!(username = %ctx.username, error = %e, "Rejected message");
            } else {
                debug!(username = %ctx.username, error = %e, "Event failed");
            }
            self.reply(ctx, ServerEvent::error(e.to_string()));
        }
        result
    }

    fn handle_client(
        &self,
        ctx: &ConnectionContext,
        event: ClientEvent,
    ) -> Result<(), DispatchError> {
        match event {
            ClientEvent::ChatMessage(raw) => {
                self.router
                    .broadcast_chat(&ctx.username, &ctx.connection_id, raw)?;
            }
            ClientEvent::PrivateMessage(request) => {
                self.router
                    .route_private(&ctx.username, &ctx.connection_id, request)?;
            }
            ClientEvent::LoadPrivateHistory(request) => {
                let messages = self
                    .router
                    .load_history(&ctx.username, &request.target_username)?;
                self.reply(
                    ctx,
                    ServerEvent::PrivateHistory(PrivateHistory {
                        target_username: request.target_username,
                        messages,
                    }),
                );
            }
            ClientEvent::TabSync(tab) => {
                self.coordinator
                    .sync_tab(&ctx.username, &ctx.connection_id, tab.into())?;
                self.coordinator.broadcast_user_list();
            }
            ClientEvent::RequestUserList => {
                self.reply(ctx, ServerEvent::UserList(self.registry.summaries()));
                self.reply(
                    ctx,
                    ServerEvent::VerifyConnectionId(ctx.connection_id.to_string()),
                );
            }
            ClientEvent::Reconnect(attempt) => {
                debug!(username = %ctx.username, attempt, "Client reconnect");
                self.coordinator.reconnect(&ctx.username, &ctx.connection_id);
            }
        }
        Ok(())
    }

    fn reply(&self, ctx: &ConnectionContext, event: ServerEvent) {
        if let Err(e) = self.transport.deliver(&ctx.connection_id, Arc::new(event)) {
            trace!(connection = %ctx.connection_id, error = %e, "Reply dropped");
        }
    }

    /// The presence registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The private history store.
    #[must_use]
    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// The session coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    /// The message router.
    #[must_use]
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_protocol::{ChatPayload, LoadHistoryRequest, PrivateMessageRequest};
    use parlor_transport::{ConnectionHub, Outbound};
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn setup() -> (Arc<ConnectionHub>, Dispatcher) {
        let hub = Arc::new(ConnectionHub::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&hub) as Arc<dyn Transport>,
            CoreConfig::default(),
        );
        (hub, dispatcher)
    }

    fn join(
        hub: &ConnectionHub,
        dispatcher: &Dispatcher,
        username: &str,
        conn: &str,
    ) -> (ConnectionContext, UnboundedReceiver<Outbound>) {
        let ctx = ConnectionContext::new(conn.into(), username);
        let rx = hub.register(ctx.connection_id.clone());
        dispatcher.dispatch(&ctx, InboundEvent::Connect).unwrap();
        (ctx, rx)
    }

    fn events(rx: &mut UnboundedReceiver<Outbound>) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Outbound::Event(event) = item {
                out.push((*event).clone());
            }
        }
        out
    }

    #[tokio::test]
    async fn test_errors_go_to_sender_only() {
        let (hub, dispatcher) = setup();
        let (alice, mut a) = join(&hub, &dispatcher, "alice", "c1");
        let (_bob, mut b) = join(&hub, &dispatcher, "bob", "c2");
        events(&mut a);
        events(&mut b);

        let request = PrivateMessageRequest {
            receiver_username: "alice".into(),
            kind: "text".into(),
            payload: json!("me"),
        };
        let result = dispatcher.dispatch(
            &alice,
            InboundEvent::Client(ClientEvent::PrivateMessage(request)),
        );
        assert_eq!(result, Err(DispatchError::Router(RouterError::SelfMessage)));

        assert!(matches!(events(&mut a).as_slice(), [ServerEvent::Error(_)]));
        assert!(events(&mut b).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_kind_reported() {
        let (hub, dispatcher) = setup();
        let (alice, mut a) = join(&hub, &dispatcher, "alice", "c1");
        events(&mut a);

        let raw = ChatPayload::Structured {
            kind: "sticker".into(),
            payload: json!(1),
        };
        assert!(dispatcher
            .dispatch(&alice, InboundEvent::Client(ClientEvent::ChatMessage(raw)))
            .is_err());
        match events(&mut a).as_slice() {
            [ServerEvent::Error(reason)] => assert!(reason.contains("sticker")),
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_history_round_trip() {
        let (hub, dispatcher) = setup();
        let (alice, mut a) = join(&hub, &dispatcher, "alice", "c1");
        let (_bob, _b) = join(&hub, &dispatcher, "bob", "c2");

        let request = PrivateMessageRequest {
            receiver_username: "bob".into(),
            kind: "text".into(),
            payload: json!("hi"),
        };
        dispatcher
            .dispatch(&alice, InboundEvent::Client(ClientEvent::PrivateMessage(request)))
            .unwrap();
        events(&mut a);

        let load = ClientEvent::LoadPrivateHistory(LoadHistoryRequest {
            target_username: "bob".into(),
        });
        dispatcher.dispatch(&alice, InboundEvent::Client(load)).unwrap();

        match events(&mut a).as_slice() {
            [ServerEvent::PrivateHistory(history)] => {
                assert_eq!(history.target_username, "bob");
                assert_eq!(history.messages.len(), 1);
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_user_list_replies_privately() {
        let (hub, dispatcher) = setup();
        let (alice, mut a) = join(&hub, &dispatcher, "alice", "c1");
        let (_bob, mut b) = join(&hub, &dispatcher, "bob", "c2");
        events(&mut a);
        events(&mut b);

        dispatcher
            .dispatch(&alice, InboundEvent::Client(ClientEvent::RequestUserList))
            .unwrap();

        match events(&mut a).as_slice() {
            [ServerEvent::UserList(list), ServerEvent::VerifyConnectionId(id)] => {
                assert_eq!(list.len(), 2);
                assert_eq!(id, "c1");
            }
            other => panic!("unexpected events {other:?}"),
        }
        assert!(events(&mut b).is_empty());
    }

    #[tokio::test]
    async fn test_tab_sync_updates_presence() {
        let (hub, dispatcher) = setup();
        let (alice, _a) = join(&hub, &dispatcher, "alice", "c1");
        let (_bob, mut b) = join(&hub, &dispatcher, "bob", "c2");
        events(&mut b);

        dispatcher
            .dispatch(&alice, InboundEvent::Client(ClientEvent::TabSync("t7".into())))
            .unwrap();

        assert!(dispatcher
            .registry()
            .get("alice")
            .unwrap()
            .has_tab(&"t7".into()));
        assert!(matches!(events(&mut b).as_slice(), [ServerEvent::UserList(_)]));

        // Claiming bob's connection is refused.
        assert!(matches!(
            dispatcher.dispatch(&alice, InboundEvent::Client(ClientEvent::TabSync("c2".into()))),
            Err(DispatchError::Session(SessionError::TabOwnedElsewhere { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_starts_grace() {
        let (hub, dispatcher) = setup();
        let (alice, _a) = join(&hub, &dispatcher, "alice", "c1");

        hub.unregister(&alice.connection_id);
        dispatcher
            .dispatch(
                &alice,
                InboundEvent::Disconnect {
                    reason: "closed".into(),
                },
            )
            .unwrap();
        assert!(dispatcher.coordinator().has_pending_eviction("alice"));

        tokio::time::sleep(DEFAULT_GRACE_PERIOD + Duration::from_millis(10)).await;
        assert!(dispatcher.registry().is_empty());
    }
}
