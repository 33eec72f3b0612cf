//! Message routing
//!
//! Handlers declare the message kinds they own and are looked up by kind.
//! A handler that fails takes its source connection down with it: a
//! misbehaving peer is disconnected rather than allowed to destabilize the
//! broker.

use crate::broadcast::Broadcaster;
use crate::connection::{Connection, TransportError};
use crate::protocol::{Message, MessageKind};
use crate::registry::ConnectionRegistry;
use crate::store::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type HandlerResult<T> = Result<T, HandlerError>;

/// Errors a handler may return while processing a message
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Rejected: {0}")]
    Rejected(String),
}

/// Errors returned when a handler registration is invalid
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegistrationError {
    #[error("Handler '{0}' declares no message types")]
    NoMessageKinds(String),

    #[error("Handler '{handler}' cannot own {kind}: peers never send it")]
    OutboundOnly { handler: String, kind: MessageKind },
}

/// Component that processes one or more message kinds
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Message kinds this handler owns
    fn handled_kinds(&self) -> Vec<MessageKind>;

    /// Process a message sent by `source`. `outbox` reaches every live
    /// connection for replies and broadcasts.
    async fn handle(
        &self,
        message: Message,
        source: &Arc<Connection>,
        outbox: Broadcaster<'_>,
    ) -> HandlerResult<()>;
}

/// Kind → handler table. Last registration for a kind wins.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<MessageKind, Arc<dyn MessageHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_handler(
        &self,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), RegistrationError> {
        let kinds = handler.handled_kinds();
        if kinds.is_empty() {
            return Err(RegistrationError::NoMessageKinds(handler.name().to_string()));
        }
        if let Some(kind) = kinds.iter().find(|k| !k.is_inbound()) {
            return Err(RegistrationError::OutboundOnly {
                handler: handler.name().to_string(),
                kind: *kind,
            });
        }

        let mut handlers = self.handlers.write().await;
        for kind in kinds {
            if let Some(previous) = handlers.insert(kind, handler.clone()) {
                tracing::info!(
                    %kind,
                    previous = previous.name(),
                    handler = handler.name(),
                    "Handler replaced"
                );
            }
        }
        tracing::debug!(handler = handler.name(), "Handler registered");
        Ok(())
    }

    pub async fn handler_for(&self, kind: MessageKind) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.read().await.get(&kind).cloned()
    }

    /// Kinds that currently have a handler, sorted
    pub async fn handled_kinds(&self) -> Vec<MessageKind> {
        let mut kinds: Vec<_> = self.handlers.read().await.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

/// What happened to one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    /// No handler owns this kind; the message was dropped
    Unhandled,
    /// The source connection was removed and must be closed
    Disconnected,
}

#[derive(Clone, Copy)]
pub struct Dispatcher<'a> {
    handlers: &'a HandlerRegistry,
    connections: &'a ConnectionRegistry,
}

impl<'a> Dispatcher<'a> {
    pub fn new(handlers: &'a HandlerRegistry, connections: &'a ConnectionRegistry) -> Self {
        Self {
            handlers,
            connections,
        }
    }

    pub async fn dispatch(&self, message: Message, source: &Arc<Connection>) -> DispatchOutcome {
        let kind = message.kind();

        if !self.connections.is_alive(source) {
            tracing::warn!(connection = %source.id(), %kind, "Message from dead connection");
            self.connections.unregister(source).await;
            return DispatchOutcome::Disconnected;
        }

        let Some(handler) = self.handlers.handler_for(kind).await else {
            tracing::warn!(connection = %source.id(), %kind, "No handler for message");
            return DispatchOutcome::Unhandled;
        };

        tracing::debug!(connection = %source.id(), %kind, handler = handler.name(), "Dispatching");

        match handler
            .handle(message, source, Broadcaster::new(self.connections))
            .await
        {
            Ok(()) => DispatchOutcome::Handled,
            Err(e) => {
                tracing::error!(
                    connection = %source.id(),
                    %kind,
                    handler = handler.name(),
                    error = %e,
                    "Message handling failed, dropping connection"
                );
                self.connections.unregister(source).await;
                DispatchOutcome::Disconnected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mock::{connection, Behaviour};
    use crate::types::Role;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        name: &'static str,
        kinds: Vec<MessageKind>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl Counting {
        fn new(name: &'static str, kinds: Vec<MessageKind>) -> Arc<Self> {
            Arc::new(Self {
                name,
                kinds,
                calls: AtomicUsize::new(0),
                fail: false,
            })
        }

        fn failing(name: &'static str, kinds: Vec<MessageKind>) -> Arc<Self> {
            Arc::new(Self {
                name,
                kinds,
                calls: AtomicUsize::new(0),
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageHandler for Counting {
        fn name(&self) -> &str {
            self.name
        }

        fn handled_kinds(&self) -> Vec<MessageKind> {
            self.kinds.clone()
        }

        async fn handle(
            &self,
            _message: Message,
            _source: &Arc<Connection>,
            _outbox: Broadcaster<'_>,
        ) -> HandlerResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(HandlerError::Rejected("boom".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_routes_by_kind() {
        let handlers = HandlerRegistry::new();
        let connections = ConnectionRegistry::new();
        let auth = Counting::new("auth", vec![MessageKind::AuthSuccess, MessageKind::AuthLogout]);
        handlers.register_handler(auth.clone()).await.unwrap();

        let (src, _) = connection(Role::Anonymous, Behaviour::Ok);
        connections.register(src.clone()).await;

        let dispatcher = Dispatcher::new(&handlers, &connections);
        assert_eq!(
            dispatcher.dispatch(Message::AuthLogout, &src).await,
            DispatchOutcome::Handled
        );
        assert_eq!(auth.calls(), 1);
    }

    #[tokio::test]
    async fn test_unhandled_kind_is_dropped() {
        let handlers = HandlerRegistry::new();
        let connections = ConnectionRegistry::new();
        let (src, _) = connection(Role::Anonymous, Behaviour::Ok);
        connections.register(src.clone()).await;

        let outcome = Dispatcher::new(&handlers, &connections)
            .dispatch(Message::GetAuthStatus, &src)
            .await;

        assert_eq!(outcome, DispatchOutcome::Unhandled);
        assert!(connections.contains(&src).await);
    }

    #[tokio::test]
    async fn test_reregistration_last_writer_wins() {
        let handlers = HandlerRegistry::new();
        let connections = ConnectionRegistry::new();
        let old = Counting::new("old", vec![MessageKind::AuthLogout, MessageKind::GetAuthStatus]);
        let new = Counting::new("new", vec![MessageKind::AuthLogout]);
        handlers.register_handler(old.clone()).await.unwrap();
        handlers.register_handler(new.clone()).await.unwrap();

        let (src, _) = connection(Role::Anonymous, Behaviour::Ok);
        connections.register(src.clone()).await;
        let dispatcher = Dispatcher::new(&handlers, &connections);

        dispatcher.dispatch(Message::AuthLogout, &src).await;
        assert_eq!(new.calls(), 1);
        assert_eq!(old.calls(), 0);

        // Kinds not re-claimed stay with the old handler
        dispatcher.dispatch(Message::GetAuthStatus, &src).await;
        assert_eq!(old.calls(), 1);
    }

    #[tokio::test]
    async fn test_failing_handler_disconnects_source_only() {
        let handlers = HandlerRegistry::new();
        let connections = ConnectionRegistry::new();
        handlers
            .register_handler(Counting::failing("bad", vec![MessageKind::AuthError]))
            .await
            .unwrap();

        let (src, _) = connection(Role::Anonymous, Behaviour::Ok);
        let (bystander, _) = connection(Role::popup(), Behaviour::Ok);
        connections.register(src.clone()).await;
        connections.register(bystander.clone()).await;

        let outcome = Dispatcher::new(&handlers, &connections)
            .dispatch(
                Message::AuthError {
                    error: "nope".to_string(),
                },
                &src,
            )
            .await;

        assert_eq!(outcome, DispatchOutcome::Disconnected);
        assert!(!connections.contains(&src).await);
        assert!(connections.contains(&bystander).await);
        assert!(src.is_closed());
    }

    #[tokio::test]
    async fn test_dead_source_never_reaches_handler() {
        let handlers = HandlerRegistry::new();
        let connections = ConnectionRegistry::new();
        let auth = Counting::new("auth", vec![MessageKind::AuthLogout]);
        handlers.register_handler(auth.clone()).await.unwrap();

        let (src, _) = connection(Role::Anonymous, Behaviour::FailProbe);
        connections.register(src.clone()).await;

        let outcome = Dispatcher::new(&handlers, &connections)
            .dispatch(Message::AuthLogout, &src)
            .await;

        assert_eq!(outcome, DispatchOutcome::Disconnected);
        assert_eq!(auth.calls(), 0);
        assert!(connections.is_empty().await);
    }

    #[tokio::test]
    async fn test_registration_validation() {
        let handlers = HandlerRegistry::new();

        let err = handlers
            .register_handler(Counting::new("empty", vec![]))
            .await
            .unwrap_err();
        assert_eq!(err, RegistrationError::NoMessageKinds("empty".to_string()));

        let err = handlers
            .register_handler(Counting::new(
                "echo",
                vec![MessageKind::AuthLogout, MessageKind::AuthStatusResponse],
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::OutboundOnly { .. }));

        // A rejected handler claims nothing
        assert!(handlers.handled_kinds().await.is_empty());
    }

    #[tokio::test]
    async fn test_handled_kinds_enumerable() {
        let handlers = HandlerRegistry::new();
        handlers
            .register_handler(Counting::new(
                "auth",
                vec![MessageKind::AuthLogout, MessageKind::GetAuthStatus],
            ))
            .await
            .unwrap();

        assert_eq!(
            handlers.handled_kinds().await,
            vec![MessageKind::GetAuthStatus, MessageKind::AuthLogout]
        );
    }
}
