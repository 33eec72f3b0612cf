use crate::broadcast::{BroadcastReport, Broadcaster};
use crate::connection::{Connection, Transport};
use crate::dispatch::{
    DispatchOutcome, Dispatcher, HandlerRegistry, MessageHandler, RegistrationError,
};
use crate::protocol::{self, Message, ProtocolError};
use crate::registry::ConnectionRegistry;
use crate::store::AuthStore;
use crate::sync::StateSync;
use crate::types::{Role, POPUP_ROLE};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Owns the connection set and handler table and wires in state sync
pub struct Broker {
    connections: ConnectionRegistry,
    handlers: HandlerRegistry,
    sync: Arc<StateSync>,
    popup_role: String,
}

impl Broker {
    /// Broker with the state-sync handler registered for the auth messages
    pub async fn new(store: Arc<dyn AuthStore>) -> Self {
        Self::with_popup_role(store, POPUP_ROLE).await
    }

    pub async fn with_popup_role(store: Arc<dyn AuthStore>, popup_role: &str) -> Self {
        let broker = Self {
            connections: ConnectionRegistry::new(),
            handlers: HandlerRegistry::new(),
            sync: Arc::new(StateSync::new(store)),
            popup_role: popup_role.to_string(),
        };

        if let Err(e) = broker.register_handler(broker.sync.clone()).await {
            tracing::error!(error = %e, "Failed to register state sync handler");
        }
        broker
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn store(&self) -> &Arc<dyn AuthStore> {
        self.sync.store()
    }

    /// Map a requested role name onto a [`Role`] using this broker's
    /// reserved popup name
    pub fn parse_role(&self, name: Option<&str>) -> Role {
        Role::parse(name, &self.popup_role)
    }

    pub async fn register_handler(
        &self,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), RegistrationError> {
        self.handlers.register_handler(handler).await
    }

    /// Register a newly opened channel. Popups get the current state pushed
    /// straight away.
    pub async fn connect(&self, role: Role, transport: Box<dyn Transport>) -> Arc<Connection> {
        let conn = Arc::new(Connection::new(role, transport));
        if self.connections.register(conn.clone()).await {
            self.sync
                .on_connect(&conn, Broadcaster::new(&self.connections))
                .await;
        }
        conn
    }

    /// Closure notification from the transport
    pub async fn disconnect(&self, conn: &Arc<Connection>) {
        self.connections.unregister(conn).await;
    }

    pub async fn dispatch(&self, message: Message, source: &Arc<Connection>) -> DispatchOutcome {
        Dispatcher::new(&self.handlers, &self.connections)
            .dispatch(message, source)
            .await
    }

    /// Decode and dispatch one raw text frame. Undecodable frames are dropped
    /// without affecting the connection.
    pub async fn handle_frame(&self, text: &str, source: &Arc<Connection>) -> DispatchOutcome {
        match protocol::decode(text) {
            Ok(envelope) => {
                tracing::debug!(
                    connection = %source.id(),
                    kind = %envelope.message.kind(),
                    from = envelope.from.as_deref(),
                    sent_at = envelope.timestamp,
                    "Frame received"
                );
                self.dispatch(envelope.message, source).await
            }
            Err(ProtocolError::UnknownType(kind)) => {
                tracing::debug!(connection = %source.id(), %kind, "Dropping unknown message type");
                DispatchOutcome::Unhandled
            }
            Err(e) => {
                tracing::warn!(connection = %source.id(), error = %e, "Dropping malformed frame");
                DispatchOutcome::Unhandled
            }
        }
    }

    pub async fn broadcast(
        &self,
        message: &Message,
        exclude: Option<&Arc<Connection>>,
    ) -> BroadcastReport {
        Broadcaster::new(&self.connections)
            .broadcast(message, exclude)
            .await
    }

    /// Re-read canonical state and broadcast it to every connection
    pub async fn notify_store_changed(&self) -> Option<BroadcastReport> {
        self.sync
            .on_store_changed(Broadcaster::new(&self.connections))
            .await
    }
}

/// Spawn a background task that rebroadcasts auth state whenever the store
/// reports a change
pub fn spawn_store_watcher(broker: Arc<Broker>) -> JoinHandle<()> {
    let mut changes = broker.store().subscribe();

    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => {
                    tracing::debug!(?change, "Auth state changed");
                    broker.notify_store_changed().await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    // State is re-read anyway, one broadcast covers them all
                    tracing::debug!(skipped, "Store watcher lagged");
                    broker.notify_store_changed().await;
                }
                Err(RecvError::Closed) => {
                    tracing::info!("Store change channel closed, watcher stopping");
                    break;
                }
            }
        }
    })
}
